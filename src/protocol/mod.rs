//! Wire protocols

pub mod rtp;
