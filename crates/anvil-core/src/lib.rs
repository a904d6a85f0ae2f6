#![forbid(unsafe_code)]

//! Core: geometry primitives and normalized pointer input for Anvil.
//!
//! # Role in Anvil
//! `anvil-core` is the vocabulary shared by the layout engine and its host.
//! It owns the pixel geometry types the position pass writes and the pointer
//! events the drag coordinator consumes. It holds no layout state.
//!
//! # Primary responsibilities
//! - **Rect / Point / Size**: viewport-pixel geometry with hit testing.
//! - **Axis**: the layout direction of a container and the helpers to slice a
//!   rectangle along it.
//! - **PointerEvent**: canonical down/move/up/cancel events with an optional
//!   host-supplied target hint.

pub mod event;
pub mod geometry;

pub use event::{Modifiers, PointerEvent, PointerEventKind};
pub use geometry::{Axis, Point, Rect, Size};
