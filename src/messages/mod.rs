//! Wire-protocol building blocks: frame codec, message builders, data types,
//! and startup-phase parsing (spec.md §4.1).

pub mod codec;
pub mod constants;
pub mod protocol;
pub mod startup;
pub mod types;

pub use codec::{
    format_command_tag, format_error_fields, get_cstring, parse_key_value_params, put_cstring,
    read_typed_frame, read_untyped_frame, write_frame, ErrorField, ReadOutcome,
};
pub use constants::*;
pub use protocol::*;
pub use startup::{parse_startup_frame, StartupFrame};
pub use types::DataType;
