//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in rmstore.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! big-endian wrapper types (I32, U32, I64). The store file format is
//! big-endian throughout, so every header field goes through these wrappers.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::big_endian::{I32, U32};
//!
//! #[repr(C)]
//! struct Header {
//!     next_id: I32,
//!     data_size: U32,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         next_id: i32,
//!         data_size: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn next_id(&self) -> i32 { self.next_id.get() }
//! // pub fn set_next_id(&mut self, val: i32) { self.next_id = I32::new(val); }
//! // pub fn data_size(&self) -> u32 { self.data_size.get() }
//! // pub fn set_data_size(&mut self, val: u32) { self.data_size = U32::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy big-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, i32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> i32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: i32) {
                self.$field = ::zerocopy::big_endian::I32::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::big_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, i64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> i64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: i64) {
                self.$field = ::zerocopy::big_endian::I64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
