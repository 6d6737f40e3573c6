//! Job execution side: triggers, contexts, the runner and start-up

pub mod bootstrap;
pub mod context;
pub mod facade;
pub mod runner;
pub mod trigger;

pub use bootstrap::{JobBootstrap, ScheduledJob};
pub use context::{ShardingContext, ShardingContexts};
pub use facade::JobFacade;
pub use runner::{JobRunner, ShardingJob};
pub use trigger::{spawn_interval_trigger, TriggerCommand, TriggerHandle};
