//! Server-side RPC routing.
//!
//! A method is described once (name, declared parameters, return shape and
//! the handler closure), sealed into a [`ServiceDescribe`] and inserted into
//! the method table. Incoming requests are validated against the declaration
//! before the handler runs, and the handler's result is validated against the
//! declared return shape before it is sent back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use hubrpc_common::protocol::fields::RCode;
use hubrpc_common::protocol::messages::{Body, Message, RpcRequest, RpcResponse};
use hubrpc_common::Connection;

/// Runtime shape tags checked against JSON values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VType {
    Bool,
    Integral,
    Numeric,
    String,
    Array,
    Object,
}

impl VType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            VType::Bool => value.is_boolean(),
            VType::Integral => value.is_i64() || value.is_u64(),
            VType::Numeric => value.is_number(),
            VType::String => value.is_string(),
            VType::Array => value.is_array(),
            VType::Object => value.is_object(),
        }
    }
}

type ServiceHandler = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Sealed description of one callable method.
pub struct ServiceDescribe {
    method: String,
    params: Vec<(String, VType)>,
    returns: VType,
    handler: ServiceHandler,
}

impl ServiceDescribe {
    pub fn builder(method: impl Into<String>) -> ServiceDescribeBuilder {
        ServiceDescribeBuilder {
            method: method.into(),
            params: Vec::new(),
            returns: VType::Object,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Every declared parameter must be present with the declared shape.
    fn check_params(&self, params: &Value) -> bool {
        for (name, vtype) in &self.params {
            match params.get(name) {
                Some(value) if vtype.matches(value) => {}
                Some(_) => {
                    tracing::error!(method = %self.method, param = %name, "parameter has the wrong type");
                    return false;
                }
                None => {
                    tracing::error!(method = %self.method, param = %name, "parameter is missing");
                    return false;
                }
            }
        }
        true
    }

    /// Run the handler; `None` when its result violates the declaration.
    fn invoke(&self, params: &Value) -> Option<Value> {
        let result = (self.handler)(params);
        if !self.returns.matches(&result) {
            tracing::error!(method = %self.method, "handler returned a result of the wrong type");
            return None;
        }
        Some(result)
    }
}

/// Accumulates a method declaration; the handler closure seals it.
pub struct ServiceDescribeBuilder {
    method: String,
    params: Vec<(String, VType)>,
    returns: VType,
}

impl ServiceDescribeBuilder {
    pub fn param(mut self, name: impl Into<String>, vtype: VType) -> ServiceDescribeBuilder {
        self.params.push((name.into(), vtype));
        self
    }

    pub fn returns(mut self, vtype: VType) -> ServiceDescribeBuilder {
        self.returns = vtype;
        self
    }

    /// Attach the handler and seal the description.
    pub fn serve(self, handler: impl Fn(&Value) -> Value + Send + Sync + 'static) -> ServiceDescribe {
        ServiceDescribe {
            method: self.method,
            params: self.params,
            returns: self.returns,
            handler: Arc::new(handler),
        }
    }
}

/// The method table.
#[derive(Default)]
pub struct ServiceManager {
    services: Mutex<HashMap<String, Arc<ServiceDescribe>>>,
}

impl ServiceManager {
    pub fn insert(&self, desc: ServiceDescribe) {
        self.services
            .lock()
            .unwrap()
            .insert(desc.method.clone(), Arc::new(desc));
    }

    pub fn select(&self, method: &str) -> Option<Arc<ServiceDescribe>> {
        self.services.lock().unwrap().get(method).cloned()
    }

    pub fn remove(&self, method: &str) {
        self.services.lock().unwrap().remove(method);
    }
}

/// Dispatcher target for RPC requests.
#[derive(Default)]
pub struct RpcRouter {
    manager: ServiceManager,
}

impl RpcRouter {
    pub fn new() -> RpcRouter {
        RpcRouter::default()
    }

    pub fn register(&self, desc: ServiceDescribe) {
        self.manager.insert(desc);
    }

    pub fn on_rpc_request(&self, conn: &Connection, id: &str, req: RpcRequest) {
        let Some(desc) = self.manager.select(&req.method) else {
            tracing::error!(method = %req.method, "service not found");
            return self.respond(conn, id, Value::Null, RCode::ServiceNotFound);
        };

        if !desc.check_params(&req.parameters) {
            return self.respond(conn, id, Value::Null, RCode::InvalidParams);
        }

        match desc.invoke(&req.parameters) {
            Some(result) => self.respond(conn, id, result, RCode::Ok),
            None => self.respond(conn, id, Value::Null, RCode::InternalError),
        }
    }

    fn respond(&self, conn: &Connection, id: &str, result: Value, rcode: RCode) {
        let reply = Message::reply(id, Body::RpcResponse(RpcResponse { rcode, result }));
        if let Err(err) = conn.send(&reply) {
            tracing::debug!(conn = conn.id(), %err, "failed to send rpc response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_service() -> ServiceDescribe {
        ServiceDescribe::builder("Add")
            .param("num1", VType::Integral)
            .param("num2", VType::Integral)
            .returns(VType::Integral)
            .serve(|params| {
                let sum = params["num1"].as_i64().unwrap_or(0)
                    + params["num2"].as_i64().unwrap_or(0);
                json!(sum)
            })
    }

    #[test]
    fn test_vtype_matches_json_shapes() {
        assert!(VType::Bool.matches(&json!(true)));
        assert!(VType::Integral.matches(&json!(7)));
        assert!(!VType::Integral.matches(&json!(7.5)));
        assert!(VType::Numeric.matches(&json!(7.5)));
        assert!(VType::String.matches(&json!("s")));
        assert!(VType::Array.matches(&json!([])));
        assert!(VType::Object.matches(&json!({})));
        assert!(!VType::Object.matches(&json!([])));
    }

    #[test]
    fn test_param_check_accepts_declared_shape() {
        let desc = add_service();
        assert!(desc.check_params(&json!({"num1": 1, "num2": 2})));
        // Extra parameters are not an error.
        assert!(desc.check_params(&json!({"num1": 1, "num2": 2, "extra": "x"})));
    }

    #[test]
    fn test_param_check_rejects_missing_and_mistyped() {
        let desc = add_service();
        assert!(!desc.check_params(&json!({"num1": 1})));
        assert!(!desc.check_params(&json!({"num1": 1, "num2": "two"})));
    }

    #[test]
    fn test_invoke_validates_the_return_shape() {
        let desc = add_service();
        assert_eq!(desc.invoke(&json!({"num1": 10, "num2": 20})), Some(json!(30)));

        let lying = ServiceDescribe::builder("Lie")
            .returns(VType::Integral)
            .serve(|_| json!("not a number"));
        assert_eq!(lying.invoke(&json!({})), None);
    }

    #[test]
    fn test_manager_select_and_remove() {
        let manager = ServiceManager::default();
        manager.insert(add_service());
        assert!(manager.select("Add").is_some());
        assert!(manager.select("Sub").is_none());
        manager.remove("Add");
        assert!(manager.select("Add").is_none());
    }
}
