//! Input handling for the TUI.

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use super::app::Action;
use crate::core::PanelAction;

/// Convert a crossterm key event to an Action.
///
/// While the label prompt is open, printable keys go to the prompt.
pub fn handle_key_event(key: KeyEvent, prompting: bool) -> Option<Action> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(Action::Quit);
    }

    if prompting {
        return match key.code {
            KeyCode::Enter => Some(Action::PromptSubmit),
            KeyCode::Esc => Some(Action::PromptCancel),
            KeyCode::Backspace => Some(Action::PromptBackspace),
            KeyCode::Char(c) if !c.is_whitespace() => Some(Action::PromptInput(c)),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        KeyCode::Char('r') | KeyCode::F(5) => Some(Action::Press(PanelAction::Reload)),
        KeyCode::Char('l') => Some(Action::StartLabel),
        KeyCode::Char('e') => Some(Action::Press(PanelAction::Eject)),
        KeyCode::Char('c') => Some(Action::Press(PanelAction::Catalog)),
        KeyCode::Char('i') => Some(Action::Press(PanelAction::ReadLabel)),
        KeyCode::Char('v') => Some(Action::Press(PanelAction::VolumeStatistics)),
        KeyCode::Char('m') => Some(Action::Press(PanelAction::CartridgeMemory)),
        _ => None,
    }
}

/// Convert a crossterm Event to an Action.
pub fn handle_event(event: Event, prompting: bool) -> Option<Action> {
    match event {
        Event::Key(key) => handle_key_event(key, prompting),
        _ => None,
    }
}

/// Key shown next to each button.
pub fn key_hint(action: PanelAction) -> char {
    match action {
        PanelAction::Reload => 'r',
        PanelAction::LabelMedia => 'l',
        PanelAction::Eject => 'e',
        PanelAction::Catalog => 'c',
        PanelAction::ReadLabel => 'i',
        PanelAction::VolumeStatistics => 'v',
        PanelAction::CartridgeMemory => 'm',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn hints_match_bindings() {
        for action in PanelAction::ALL {
            let mapped = handle_key_event(key(KeyCode::Char(key_hint(action))), false);
            match action {
                PanelAction::LabelMedia => assert_eq!(mapped, Some(Action::StartLabel)),
                other => assert_eq!(mapped, Some(Action::Press(other))),
            }
        }
    }

    #[test]
    fn prompt_captures_letters() {
        assert_eq!(
            handle_key_event(key(KeyCode::Char('q')), true),
            Some(Action::PromptInput('q'))
        );
        assert_eq!(handle_key_event(key(KeyCode::Esc), true), Some(Action::PromptCancel));
        assert_eq!(handle_key_event(key(KeyCode::Char(' ')), true), None);
        assert_eq!(handle_key_event(key(KeyCode::Esc), false), Some(Action::Quit));
    }

    #[test]
    fn ctrl_c_always_quits() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(handle_key_event(ctrl_c, true), Some(Action::Quit));
        assert_eq!(handle_key_event(ctrl_c, false), Some(Action::Quit));
    }
}
