//! dsk-provider
//!
//! Provider side of the toolkit:
//!
//! - [`ProviderSdk`] accumulates kinds and procedures and registers them.
//! - [`build_router`] serves the engine's callbacks against the frozen
//!   [`ProviderCatalog`].
//! - [`ProceduralCtx`] is what a handler sees while serving one call.
//! - [`SecurityApi`] wraps the engine's user-info and s2s-key endpoints.

mod catalog;
mod context;
mod dispatch;
mod handler;
mod sdk;
mod security;

pub use catalog::{HandlerTable, ProviderCatalog, Route, RouteKind};
pub use context::ProceduralCtx;
pub use dispatch::{build_router, CallPhase};
pub use handler::{EntityHook, EntityProcedureHandler, IntentfulHandler, ProcedureHandler};
pub use sdk::{KindBuilder, ProviderSdk, RegisteredProvider};
pub use security::SecurityApi;
