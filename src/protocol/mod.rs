pub mod codec;
pub mod kind;

pub use codec::{
    decode, encode, DecodeError, EncodeError, Sample, DEFAULT_PORT, HEADER_LEN, MAX_NAME_LEN,
};
pub use kind::AggregationKind;
