//! Typed message bodies layered over the raw wire codec.

pub mod route;

pub use route::{
    DecodedNextHop, RouteFamily, RouteMessage, RouteRequest, RouteType, RtMsg, WireNextHop,
};
