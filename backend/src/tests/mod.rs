pub mod support;

pub mod listener_flow;
