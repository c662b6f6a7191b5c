//! The central scheduler: authoritative owner of the frontier and every
//! resource pool, plus the client-side pieces that talk to it.

pub mod client;
pub mod link_sink;
pub mod refresher;
pub mod seeder;
pub mod server;
pub mod state;

pub use client::{ClientError, SchedulerClient};
pub use link_sink::LinkSink;
pub use refresher::ProxyRefresher;
pub use seeder::{HotSeeder, TopicSeeder};
pub use server::SchedulerServer;
pub use state::SchedulerState;
