//! Protocol module containing the data model and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_broadcast, decode_point, decode_response, decode_status, encode_broadcast,
    encode_command, encode_point, encode_status, WireError,
};
pub use messages::*;
