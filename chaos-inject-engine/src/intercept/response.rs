use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use derivative::Derivative;
use http::{Request, Response};
use hyper::service::Service;
use hyper::Body;
use tracing::{debug, instrument};

use crate::handler::action::Executor;
use crate::handler::fault::Fault;
use crate::handler::selector::{eligible, Actor};
use crate::intercept::route::{ResolvedRoute, RouteResolver};
use crate::store::RuleStore;

/// Brings chaos to inbound requests: delays them, raises faults or substitutes the response.
/// The first rule producing a response ends the evaluation.
#[derive(Debug, Clone)]
pub struct ResponseInterceptor {
    store: Arc<RuleStore>,
    executor: Executor,
}

impl ResponseInterceptor {
    pub fn new(store: Arc<RuleStore>, executor: Executor) -> Self {
        Self { store, executor }
    }

    /// Rules of the route run most recently modified first. `Ok(None)` means the request goes on
    /// unmodified.
    #[instrument(skip(self))]
    pub fn intercept(
        &self,
        route: &ResolvedRoute,
        actor: &Actor,
    ) -> Result<Option<Response<Body>>, Fault> {
        let candidates = self
            .store
            .response_candidates(route.name.as_deref(), &route.namespaces);
        for rule in candidates
            .iter()
            .filter(|rule| eligible(rule, self.store.host(), actor))
        {
            debug!("request matched, rule({})", rule);
            if let Some(response) = self.executor.perform_response(rule)? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// Runs the [ResponseInterceptor] in front of an inner service.
///
/// The acting identity is read from the request extensions, requests without an [Actor] are
/// anonymous. Injected faults are returned as the service error, callers can downcast them to
/// [Fault] or render them with [Fault::into_response].
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct ChaosService<S> {
    interceptor: Arc<ResponseInterceptor>,
    #[derivative(Debug = "ignore")]
    routes: Arc<dyn RouteResolver>,
    #[derivative(Debug = "ignore")]
    inner: S,
}

impl<S: Clone> Clone for ChaosService<S> {
    fn clone(&self) -> Self {
        Self {
            interceptor: self.interceptor.clone(),
            routes: self.routes.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<S> ChaosService<S> {
    pub fn new(
        interceptor: Arc<ResponseInterceptor>,
        routes: Arc<dyn RouteResolver>,
        inner: S,
    ) -> Self {
        Self {
            interceptor,
            routes,
            inner,
        }
    }
}

impl<S> Service<Request<Body>> for ChaosService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Error: Into<anyhow::Error>,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = anyhow::Error;
    #[allow(clippy::type_complexity)]
    type Future =
        Pin<Box<dyn 'static + Send + Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let interceptor = self.interceptor.clone();
        let routes = self.routes.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let route = match routes.resolve(request.uri().path()) {
                Some(route) => route,
                None => {
                    debug!("no route for {}, skip chaos", request.uri().path());
                    return inner.call(request).await.map_err(Into::into);
                }
            };
            let actor = request
                .extensions()
                .get::<Actor>()
                .cloned()
                .unwrap_or_default();

            // slow effects block, keep them off the async workers
            let outcome =
                tokio::task::spawn_blocking(move || interceptor.intercept(&route, &actor)).await?;
            match outcome? {
                Some(response) => Ok(response),
                None => inner.call(request).await.map_err(Into::into),
            }
        })
    }
}
