#![forbid(unsafe_code)]

//! Canonical pointer event types.
//!
//! The host translates DOM/native pointer input into [`PointerEvent`] values
//! before handing them to the layout engine. Events are processed strictly in
//! arrival order; they carry no timestamps of their own.
//!
//! # Design Notes
//!
//! - Positions are viewport pixels and may lie outside the canvas.
//! - The target hint is host-defined: the layout crate uses it to name the
//!   drag source on `Down`.
//! - `Modifiers` use bitflags for easy combination.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// The phase of a pointer interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerEventKind {
    /// Pointer pressed; starts a drag when a target hint is present.
    Down,
    /// Pointer moved while held.
    Move,
    /// Pointer released.
    Up,
    /// Interaction cancelled by the host (Escape, focus loss, ...).
    Cancel,
}

bitflags! {
    /// Modifier keys held during a pointer event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        /// No modifiers.
        const NONE  = 0b0000;
        /// Shift key.
        const SHIFT = 0b0001;
        /// Alt/Option key.
        const ALT   = 0b0010;
        /// Control key.
        const CTRL  = 0b0100;
        /// Super/Meta/Command key.
        const SUPER = 0b1000;
    }
}

/// A pointer event with an optional host-supplied target hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerEvent<H> {
    pub kind: PointerEventKind,
    pub position: Point,
    pub target_hint: Option<H>,
    pub modifiers: Modifiers,
}

impl<H> PointerEvent<H> {
    /// Create an event without hint or modifiers.
    #[must_use]
    pub const fn new(kind: PointerEventKind, position: Point) -> Self {
        Self {
            kind,
            position,
            target_hint: None,
            modifiers: Modifiers::NONE,
        }
    }

    /// Pointer pressed on `hint` at `position`.
    #[must_use]
    pub fn down(position: Point, hint: H) -> Self {
        Self::new(PointerEventKind::Down, position).with_hint(hint)
    }

    /// Pointer moved to `position`.
    #[must_use]
    pub const fn moved(position: Point) -> Self {
        Self::new(PointerEventKind::Move, position)
    }

    /// Pointer released at `position`.
    #[must_use]
    pub const fn up(position: Point) -> Self {
        Self::new(PointerEventKind::Up, position)
    }

    /// Host cancellation.
    #[must_use]
    pub const fn cancel() -> Self {
        Self::new(PointerEventKind::Cancel, Point::new(0, 0))
    }

    /// Set the target hint.
    #[must_use]
    pub fn with_hint(mut self, hint: H) -> Self {
        self.target_hint = Some(hint);
        self
    }

    /// Set the modifiers.
    #[must_use]
    pub const fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}
