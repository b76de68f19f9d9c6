//! Declared-method client
//!
//! A `Client` knows the methods of one service. Each declared method is a
//! [`Method`] whose innermost handler runs the invocation engine, so client
//! middleware sees every call the same way server middleware does: method
//! name, context and type-erased arguments.
//!
//! # Cloning
//!
//! `Client` is cheaply cloneable; all clones share the transport and the
//! method table.

use crate::engine::InvocationEngine;
use frpc_core::middleware::{from_fn, Arguments, Invocation, InvocationHandler, Method, Reply};
use frpc_core::{CallContext, Error, MethodResult, Result, StructValue};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Client for one service
#[derive(Clone)]
pub struct Client {
    engine: InvocationEngine,
    methods: Arc<HashMap<String, Method>>,
}

impl Client {
    pub(crate) fn new(engine: InvocationEngine, methods: HashMap<String, Method>) -> Self {
        Self {
            engine,
            methods: Arc::new(methods),
        }
    }

    /// Call a declared method
    ///
    /// `A` must be the argument struct and `T` the success type the method
    /// was declared with. Response headers are merged into `ctx`.
    ///
    /// # Errors
    ///
    /// - `UnknownMethod` when `method` was never declared
    /// - `Internal` when `A` or `T` do not match the declaration
    /// - anything the engine or middleware returns
    pub async fn call<A, T>(&self, ctx: &CallContext, method: &str, args: A) -> Result<T>
    where
        A: Any + Send,
        T: Any,
    {
        let declared = self
            .methods
            .get(method)
            .ok_or_else(|| Error::UnknownMethod(method.to_string()))?;
        let reply = declared.invoke(ctx.clone(), Arguments::new(args)).await?;
        reply.downcast::<T>()
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Names of the declared methods
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn engine(&self) -> &InvocationEngine {
        &self.engine
    }
}

/// Innermost handler of a declared method: run the engine
pub(crate) fn bind_method<A, R>(engine: InvocationEngine, name: String) -> Arc<dyn InvocationHandler>
where
    A: StructValue,
    R: MethodResult,
{
    from_fn(move |invocation: Invocation| {
        let engine = engine.clone();
        let name = name.clone();
        async move {
            let args: A = invocation.arguments.downcast()?;
            let success = engine
                .invoke::<A, R>(&invocation.context, &name, args)
                .await?;
            Ok(Reply::new(success))
        }
    })
}
