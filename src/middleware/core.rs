use std::sync::Arc;
use std::time::Duration;

use crate::context::{Context, Response};
use crate::errors::DispatchError;

/// What a before-filter decided.
#[derive(Debug)]
pub enum FilterOutcome {
    Continue,
    /// Stop here; this becomes the response (after-filters still run).
    Halt(Response),
}

pub trait BeforeFilter: Send + Sync {
    fn before(&self, ctx: &mut Context<'_>) -> Result<FilterOutcome, DispatchError>;
}

impl<F> BeforeFilter for F
where
    F: Fn(&mut Context<'_>) -> Result<FilterOutcome, DispatchError> + Send + Sync,
{
    fn before(&self, ctx: &mut Context<'_>) -> Result<FilterOutcome, DispatchError> {
        self(ctx)
    }
}

pub trait AfterFilter: Send + Sync {
    fn after(&self, ctx: &mut Context<'_>, response: &mut Response) -> Result<(), DispatchError>;
}

impl<F> AfterFilter for F
where
    F: Fn(&mut Context<'_>, &mut Response) -> Result<(), DispatchError> + Send + Sync,
{
    fn after(&self, ctx: &mut Context<'_>, response: &mut Response) -> Result<(), DispatchError> {
        self(ctx, response)
    }
}

/// Paired before/after hooks registered together for one prefix.
pub trait Middleware: Send + Sync {
    fn before(&self, _ctx: &mut Context<'_>) -> Result<FilterOutcome, DispatchError> {
        Ok(FilterOutcome::Continue)
    }
    fn after(&self, _ctx: &mut Context<'_>, _res: &mut Response, _latency: Duration) {}
}

pub(crate) struct BeforeHook<M: ?Sized>(pub Arc<M>);

impl<M: Middleware + ?Sized> BeforeFilter for BeforeHook<M> {
    fn before(&self, ctx: &mut Context<'_>) -> Result<FilterOutcome, DispatchError> {
        self.0.before(ctx)
    }
}

pub(crate) struct AfterHook<M: ?Sized>(pub Arc<M>);

impl<M: Middleware + ?Sized> AfterFilter for AfterHook<M> {
    fn after(&self, ctx: &mut Context<'_>, response: &mut Response) -> Result<(), DispatchError> {
        let latency = ctx.elapsed();
        self.0.after(ctx, response, latency);
        Ok(())
    }
}
