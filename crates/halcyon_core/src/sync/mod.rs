//! # Synchronization Between Update and Render
//!
//! ## The Problem
//!
//! ```text
//! Thread 1 (Update):  WRITE camera, lights, grids, entities
//! Thread 2 (Render):  READ the same data and issue GPU commands
//!
//! Without synchronization: TORN SNAPSHOT → flicker, garbage uploads
//! With a lock per field:   CONTENTION and still no consistent frame
//! ```
//!
//! ## The Solution: Slot Rotation
//!
//! ```text
//! Cycle N:
//!   Update extracts into slot N % S
//!   Render reads slot (N - 1) % S (last completed extraction)
//!
//! advance():
//!   N += 1 (one step, all states at once)
//! ```
//!
//! The rotation is the only barrier between the threads.

mod registry;

pub use registry::{
    ExtractionFrame, RegistryBuilder, RenderStateRegistry, RenderView, StateRef, MAX_SLOTS,
    MIN_SLOTS,
};
