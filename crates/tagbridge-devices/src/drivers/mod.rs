/*!
 * Driver implementations shipped with TagBridge.
 *
 * This module contains the drivers registered by
 * [`DriverRegistry::with_builtin_drivers`](crate::registry::DriverRegistry::with_builtin_drivers).
 */

pub mod binder;
pub mod binder_kbf;
pub mod test;

// Re-export driver implementations for convenience
pub use binder::BinderKbDriver;
pub use binder_kbf::BinderKbfDriver;
pub use test::TestDriver;
