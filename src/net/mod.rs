//! Network plumbing shared by the probes: the UDP endpoint multiplexer and
//! the companion agent protocol.

pub mod agent;
pub mod mux;

pub use agent::{AgentClient, AgentRequest, AgentResponse, DEFAULT_AGENT_PORT};
pub use mux::{EndpointListener, EndpointMux, MuxSubscriber, TrafficStats};
