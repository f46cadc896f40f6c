//! Bluetooth LE central-role session engine.
//!
//! `gattlink` correlates fire-and-forget requests issued to a platform radio
//! stack with the callbacks that eventually deliver their results. A
//! [`Central`] owns one [`Session`] per peripheral. Each session tracks the
//! connection state, caches the discovered GATT hierarchy, and allows at most
//! one pending operation per attribute and operation kind.
//!
//! The platform stack is abstracted by the [`Radio`] trait. Its callbacks are
//! delivered to [`Central::handle`] as [`RadioEvent`]s.

#![warn(missing_debug_implementations)]
#![warn(non_ascii_idents)]
#![warn(single_use_lifetimes)]
#![warn(unused_crate_dependencies)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_lifetimes)]
#![warn(unused_qualifications)]
#![warn(variant_size_differences)]
#![warn(clippy::cargo)]
#![warn(clippy::nursery)]
#![warn(clippy::pedantic)]
#![allow(clippy::enum_glob_use)]
#![allow(clippy::inline_always)]
#![allow(clippy::module_name_repetitions)]
// #![warn(clippy::restriction)]
#![warn(clippy::assertions_on_result_states)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::decimal_literal_representation)]
#![warn(clippy::default_union_representation)]
#![warn(clippy::deref_by_slicing)]
#![warn(clippy::empty_drop)]
#![warn(clippy::empty_structs_with_brackets)]
#![warn(clippy::exhaustive_enums)]
#![warn(clippy::exit)]
#![warn(clippy::fn_to_numeric_cast_any)]
#![warn(clippy::format_push_string)]
#![warn(clippy::get_unwrap)]
#![warn(clippy::if_then_some_else_none)]
#![warn(clippy::lossy_float_literal)]
#![warn(clippy::missing_enforced_import_renames)]
#![warn(clippy::mixed_read_write_in_expression)]
#![warn(clippy::mod_module_files)]
#![warn(clippy::mutex_atomic)]
#![warn(clippy::pattern_type_mismatch)]
#![warn(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![warn(clippy::rc_mutex)]
#![warn(clippy::rest_pat_in_fully_bound_structs)]
//#![warn(clippy::semicolon_outside_block)]
#![warn(clippy::str_to_string)]
#![warn(clippy::string_add)]
#![warn(clippy::string_to_string)]
#![warn(clippy::suspicious_xor_used_as_pow)]
#![warn(clippy::todo)]
#![warn(clippy::try_err)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(clippy::unnecessary_safety_comment)]
#![warn(clippy::unnecessary_safety_doc)]
#![warn(clippy::unnecessary_self_imports)]
#![warn(clippy::unneeded_field_pattern)]
#![warn(clippy::unseparated_literal_suffix)]

pub use gattlink_const as consts;
pub use gattlink_const::{ParseUuidError, Uuid, Uuid16};
pub use {
    central::*,
    config::*,
    error::*,
    gatt::{Characteristic, Descriptor, Props, Service},
    radio::*,
    scan::{ScanResult, ScanResults},
    session::{ConnectionState, ConnectionStates, Notifications, Session},
    status::*,
    stream::{EventStream, NextEvent},
};

mod broker;
mod central;
mod config;
mod error;
mod gatt;
mod radio;
mod scan;
mod session;
pub mod sim;
mod status;
mod stream;

type SyncMutex<T> = parking_lot::Mutex<T>;
