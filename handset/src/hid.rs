//! Input event synthesis.
//!
//! Gestures become an [`InputSequence`]: an ordered list of HID events with
//! explicit pauses between them. A sequence is played over one
//! bidirectional `Hid` call, sleeping on the calling thread for each pause,
//! then half-closed; the single acknowledgement covers the whole exchange.

use std::thread;
use std::time::Duration;

use handset_proto::{ButtonKind, Call, Direction, HidEvent, HidResponse, Point, PressAction};

use crate::channel::Channel;
use crate::error::Result;
use crate::stream::{Ack, RequestStream};

/// HID usage code for Return.
pub const KEY_ENTER: u32 = 40;
/// HID usage code for Escape.
pub const KEY_ESCAPE: u32 = 41;
/// HID usage code for Backspace (delete backwards).
pub const KEY_BACKSPACE: u32 = 42;
/// HID usage code for Tab.
pub const KEY_TAB: u32 = 43;
/// HID usage code for Space.
pub const KEY_SPACE: u32 = 44;
/// HID usage code for forward delete.
pub const KEY_DELETE: u32 = 76;

/// One step of an input sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Send an event.
    Event(HidEvent),
    /// Sleep before the next step.
    Pause(Duration),
}

/// Ordered input events with pacing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSequence {
    /// Steps in send order.
    steps: Vec<Step>,
}

impl InputSequence {
    /// Empty sequence.
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Touch down, hold, touch up at `(x, y)`.
    pub fn press(x: f64, y: f64, hold: Duration) -> Self {
        let mut seq = Self::new();
        seq.push_press(PressAction::Touch(Point { x, y }), hold);
        seq
    }

    /// Two presses at `(x, y)` separated by `gap`.
    pub fn double_tap(x: f64, y: f64, hold: Duration, gap: Duration) -> Self {
        let mut seq = Self::press(x, y, hold);
        seq.steps.push(Step::Pause(gap));
        seq.push_press(PressAction::Touch(Point { x, y }), hold);
        seq
    }

    /// One character event per `char` of `text`, each followed by `delay`.
    pub fn text(text: &str, delay: Duration) -> Self {
        let mut seq = Self::new();
        for c in text.chars() {
            seq.steps.push(Step::Event(HidEvent::Character(c)));
            seq.steps.push(Step::Pause(delay));
        }
        seq
    }

    /// `count` backspace strokes, each followed by `delay`.
    pub fn erase(count: usize, delay: Duration) -> Self {
        let mut seq = Self::new();
        for _ in 0..count {
            seq.push_press(PressAction::Key(KEY_BACKSPACE), Duration::ZERO);
            seq.steps.push(Step::Pause(delay));
        }
        seq
    }

    /// A single key or button stroke.
    pub fn stroke(action: PressAction) -> Self {
        let mut seq = Self::new();
        seq.push_press(action, Duration::ZERO);
        seq
    }

    /// Appends down, optional hold, up.
    fn push_press(&mut self, action: PressAction, hold: Duration) {
        self.steps.push(Step::Event(HidEvent::Press {
            action,
            direction: Direction::Down,
        }));
        if !hold.is_zero() {
            self.steps.push(Step::Pause(hold));
        }
        self.steps.push(Step::Event(HidEvent::Press {
            action,
            direction: Direction::Up,
        }));
    }

    /// Steps in send order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Events only, in send order.
    pub fn events(&self) -> impl Iterator<Item = HidEvent> + '_ {
        self.steps.iter().filter_map(|s| match s {
            Step::Event(ev) => Some(*ev),
            Step::Pause(_) => None,
        })
    }

    /// Sum of all pauses.
    pub fn duration(&self) -> Duration {
        self.steps
            .iter()
            .map(|s| match s {
                Step::Pause(d) => *d,
                Step::Event(_) => Duration::ZERO,
            })
            .sum()
    }

    /// Plays the sequence over one `Hid` call and waits for the acknowledgement.
    pub(crate) fn play(&self, channel: &Channel) -> Result<()> {
        let conn = channel.open(&Call::Hid)?;
        let mut stream: RequestStream<HidEvent, ()> =
            RequestStream::spawn::<HidResponse, _>(conn, Ack::new("hid"))?;
        for step in &self.steps {
            match step {
                Step::Event(ev) => stream.send(*ev)?,
                Step::Pause(d) => thread::sleep(*d),
            }
        }
        stream.complete()
    }
}

/// Lowercases `name` and drops `-`, `_` and spaces.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Maps a keyboard key name to a press action.
///
/// Names are case-insensitive; `-`, `_` and spaces are ignored.
pub fn key_for_name(name: &str) -> Option<PressAction> {
    let code = match normalize(name).as_str() {
        "enter" | "return" => KEY_ENTER,
        "escape" | "esc" => KEY_ESCAPE,
        "backspace" => KEY_BACKSPACE,
        "tab" => KEY_TAB,
        "space" => KEY_SPACE,
        "delete" => KEY_DELETE,
        _ => return None,
    };
    Some(PressAction::Key(code))
}

/// Maps a hardware button name to a press action, with the same name rules
/// as [`key_for_name`].
pub fn button_for_name(name: &str) -> Option<PressAction> {
    let button = match normalize(name).as_str() {
        "home" => ButtonKind::Home,
        "lock" | "power" => ButtonKind::Lock,
        "siri" => ButtonKind::Siri,
        "sidebutton" => ButtonKind::SideButton,
        "applepay" => ButtonKind::ApplePay,
        _ => return None,
    };
    Some(PressAction::Button(button))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(x: f64, y: f64, direction: Direction) -> HidEvent {
        HidEvent::Press {
            action: PressAction::Touch(Point { x, y }),
            direction,
        }
    }

    #[test]
    fn press_is_down_hold_up() {
        let seq = InputSequence::press(10.0, 20.0, Duration::from_millis(50));
        assert_eq!(
            seq.steps(),
            [
                Step::Event(touch(10.0, 20.0, Direction::Down)),
                Step::Pause(Duration::from_millis(50)),
                Step::Event(touch(10.0, 20.0, Direction::Up)),
            ]
        );
    }

    #[test]
    fn text_keeps_order_and_repeats() {
        let seq = InputSequence::text("aab", Duration::from_millis(75));
        let chars: Vec<_> = seq
            .events()
            .map(|e| match e {
                HidEvent::Character(c) => c,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(chars, ['a', 'a', 'b']);
        assert_eq!(seq.duration(), Duration::from_millis(225));
    }

    #[test]
    fn text_counts_chars_not_bytes() {
        let seq = InputSequence::text("héllo✓", Duration::ZERO);
        assert_eq!(seq.events().count(), 6);
    }

    #[test]
    fn double_tap_has_two_presses() {
        let seq = InputSequence::double_tap(
            1.0,
            2.0,
            Duration::from_millis(50),
            Duration::from_millis(100),
        );
        let events: Vec<_> = seq.events().collect();
        assert_eq!(
            events,
            [
                touch(1.0, 2.0, Direction::Down),
                touch(1.0, 2.0, Direction::Up),
                touch(1.0, 2.0, Direction::Down),
                touch(1.0, 2.0, Direction::Up),
            ]
        );
        assert_eq!(seq.duration(), Duration::from_millis(200));
    }

    #[test]
    fn erase_sends_backspace_pairs() {
        let seq = InputSequence::erase(3, Duration::from_millis(1));
        assert_eq!(seq.events().count(), 6);
        assert!(seq.events().all(|e| matches!(
            e,
            HidEvent::Press {
                action: PressAction::Key(KEY_BACKSPACE),
                ..
            }
        )));
    }

    #[test]
    fn names_map_to_actions() {
        assert_eq!(key_for_name("Enter"), Some(PressAction::Key(KEY_ENTER)));
        assert_eq!(
            button_for_name("side_button"),
            Some(PressAction::Button(ButtonKind::SideButton))
        );
        assert_eq!(
            button_for_name("HOME"),
            Some(PressAction::Button(ButtonKind::Home))
        );
        assert_eq!(key_for_name("volume up"), None);
    }

    #[test]
    fn keys_and_buttons_do_not_overlap() {
        assert_eq!(key_for_name("home"), None);
        assert_eq!(button_for_name("enter"), None);
    }
}
