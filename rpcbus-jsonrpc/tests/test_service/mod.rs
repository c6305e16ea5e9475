use std::sync::Arc;

use futures::lock::Mutex;
use rpcbus_jsonrpc::{
    Argument, ArgumentResolver, ErrorCode, ErrorKind, ExceptionHandlerMethod, Failure, FromArgument, HandlerError,
    HandlerGroup, HandlerMethod, Json, MatchedHandler, ParamDescriptor, ParamType, Params, RequestMessage, Result,
    RpcBus, SessionId, SubscribeMethod,
};
use serde::{Deserialize, Serialize};

/// A withdrawal larger than the balance.
pub const OVERDRAWN: ErrorKind = ErrorKind::new("Overdrawn", &ErrorKind::INVALID_STATE);

/// State shared by all handlers of the test service, supplied to them by [`LedgerResolver`].
#[derive(Debug)]
pub struct LedgerState {
    pub total: i64,
    pub balance: i64,
}

pub type SharedLedger = Arc<Mutex<LedgerState>>;

/// Extractor for the shared ledger.
pub struct Ledger(pub SharedLedger);

impl FromArgument for Ledger {
    const PARAM_TYPE: ParamType = ParamType::Custom("ledger");

    fn from_argument(argument: Argument, _param: &ParamDescriptor) -> Result<Self, HandlerError> {
        argument
            .downcast_custom::<Mutex<LedgerState>>()
            .map(Ledger)
            .ok_or_else(|| HandlerError::invalid_state("Argument is not the ledger"))
    }
}

/// Resolves [`Ledger`] parameters; registered with the bus as an application resolver.
pub struct LedgerResolver(pub SharedLedger);

impl ArgumentResolver for LedgerResolver {
    fn supports_parameter(&self, param: &ParamDescriptor) -> bool {
        param.param_type == ParamType::Custom("ledger")
    }

    fn resolve_argument(&self, _param: &ParamDescriptor, _message: &RequestMessage) -> Result<Argument> {
        Ok(Argument::Custom(self.0.clone()))
    }
}

struct Calculator;
struct Bank;

/// Create a bus serving the test service, along with the ledger its handlers share.
///
/// The `Calculator` group declares no exception handlers, so its failures are answered with
/// plain error responses.  The `Bank` group, prefixed `bank.`, recovers from every failure.
pub fn test_service_bus(balance: i64) -> (RpcBus, SharedLedger) {
    let ledger = Arc::new(Mutex::new(LedgerState { total: 0, balance }));

    let calculator = HandlerGroup::new::<Calculator>()
        .method(HandlerMethod::request("add", add).with_param_names(["x", "y"]))
        .method(HandlerMethod::request("divide", divide).with_param_names(["x", "y"]))
        .method(HandlerMethod::request("accumulate", accumulate))
        .method(HandlerMethod::request("total", total))
        .method(HandlerMethod::request("whoami", whoami))
        .method(HandlerMethod::subscribe("ticks.subscribe", "ticks.tick", subscribe_ticks));

    let bank = HandlerGroup::new::<Bank>()
        .with_prefix("bank.")
        .method(HandlerMethod::request("withdraw", withdraw))
        .method(HandlerMethod::request("fail", fail))
        .method(HandlerMethod::request("explode", explode))
        .exception_handler(ExceptionHandlerMethod::new(on_error))
        .exception_handler(ExceptionHandlerMethod::for_kinds([OVERDRAWN], on_overdrawn));

    let bus = RpcBus::builder()
        .with_group(calculator)
        .with_group(bank)
        .with_argument_resolver(Arc::new(LedgerResolver(ledger.clone())))
        .build()
        .unwrap();

    (bus, ledger)
}

async fn add(Params(x): Params<i64>, Params(y): Params<i64>) -> Result<i64, HandlerError> {
    Ok(x + y)
}

async fn divide(Params(x): Params<i64>, Params(y): Params<i64>) -> Result<i64, HandlerError> {
    if y == 0 {
        return Err(HandlerError::invalid_argument("division by zero").with_code(ErrorCode::ServerError(-32000)));
    }
    Ok(x / y)
}

async fn accumulate(Ledger(ledger): Ledger, Params(value): Params<i64>) -> Json<i64> {
    let mut ledger = ledger.lock().await;
    ledger.total += value;
    Json(ledger.total)
}

async fn total(Ledger(ledger): Ledger) -> Json<i64> {
    Json(ledger.lock().await.total)
}

async fn whoami(SessionId(session_id): SessionId) -> Json<Option<String>> {
    Json(session_id)
}

async fn subscribe_ticks(SubscribeMethod(method): SubscribeMethod) -> String {
    format!("subscribed to {}", method.as_deref().unwrap_or("nothing"))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WithdrawParams {
    pub amount: i64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct WithdrawResponse {
    pub balance: i64,
}

async fn withdraw(
    Ledger(ledger): Ledger,
    Params(WithdrawParams { amount }): Params<WithdrawParams>,
) -> Result<WithdrawResponse, HandlerError> {
    let mut ledger = ledger.lock().await;
    if amount > ledger.balance {
        return Err(HandlerError::new(
            OVERDRAWN,
            format!("cannot withdraw {amount} from {}", ledger.balance),
        ));
    }

    ledger.balance -= amount;
    Ok(WithdrawResponse {
        balance: ledger.balance,
    })
}

async fn fail() -> anyhow::Result<()> {
    anyhow::bail!("boom")
}

async fn explode() {
    panic!("kaboom")
}

async fn on_error(Failure(err): Failure) -> String {
    err.message().to_string()
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Overdrawn {
    pub method: String,
    pub reason: String,
}

async fn on_overdrawn(Failure(err): Failure, MatchedHandler(handler): MatchedHandler) -> Json<Overdrawn> {
    Json(Overdrawn {
        method: handler.destination().to_string(),
        reason: err.message().to_string(),
    })
}
