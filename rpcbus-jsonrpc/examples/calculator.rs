//! A calculator served over a line-delimited JSON transport.
//!
//! The "transport" is an in-memory pipe framed into lines.  Every line read from it is handed to
//! the bus; every response or notification the bus produces is written back as a line.
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rpcbus_jsonrpc::{
    FnMessageHandler, HandlerGroup, HandlerMethod, JsonRpcMessage, Message, Params, RpcBus, SubscribableChannel,
};
use serde_json::{Value as JsonValue, json};
use tokio::io::duplex;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};

struct Calculator;

async fn add(Params(x): Params<f64>, Params(y): Params<f64>) -> anyhow::Result<f64> {
    Ok(x + y)
}

async fn divide(Params(x): Params<f64>, Params(y): Params<f64>) -> anyhow::Result<f64> {
    anyhow::ensure!(y != 0.0, "division by zero");
    Ok(x / y)
}

async fn watch() -> String {
    "watching".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (client, server) = duplex(1024);
    let mut client = Framed::new(client, LinesCodec::new_with_max_length(1024 * 1024));
    let server = Framed::new(server, LinesCodec::new_with_max_length(1024 * 1024));

    let bus = RpcBus::builder()
        .with_group(
            HandlerGroup::new::<Calculator>()
                .with_prefix("calc.")
                .method(HandlerMethod::request("add", add).with_param_names(["x", "y"]))
                .method(HandlerMethod::request("divide", divide).with_param_names(["x", "y"]))
                .method(HandlerMethod::subscribe("watch", "calc.result", watch)),
        )
        .build()?;

    // One connection, so one session
    const SESSION: &str = "connection-1";
    let (mut server_sink, mut server_stream) = server.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    bus.outbound()
        .subscribe(Arc::new(FnMessageHandler::new(move |message: Arc<Message<JsonRpcMessage>>| {
            let outbound_tx = outbound_tx.clone();
            async move {
                outbound_tx.send(message.payload().to_json_string()?)?;
                Ok(())
            }
        })));

    let writer = tokio::spawn(async move {
        while let Some(line) = outbound_rx.recv().await {
            if server_sink.send(line).await.is_err() {
                break;
            }
        }
    });

    let bus = Arc::new(bus);
    let reader = tokio::spawn({
        let bus = bus.clone();
        async move {
            while let Some(Ok(line)) = server_stream.next().await {
                match serde_json::from_str::<JsonValue>(&line) {
                    Ok(payload) => {
                        let _ = bus.receive(SESSION, payload);
                    }
                    Err(err) => eprintln!("Ignoring malformed line: {err}"),
                }
            }
        }
    });

    let requests = [
        json!({"jsonrpc": "2.0", "id": 1, "method": "calc.add", "params": {"x": 1.5, "y": 2}}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "calc.divide", "params": [1, 0]}),
        json!({"jsonrpc": "2.0", "id": 3, "method": "calc.sqrt", "params": [4]}),
        json!({"jsonrpc": "2.0", "id": 4, "method": "calc.watch"}),
    ];
    for request in requests {
        println!("--> {request}");
        client.send(request.to_string()).await?;
        if let Some(line) = client.next().await {
            println!("<-- {}", line?);
        }
    }

    bus.template().broadcast("calc.result", &json!({"value": 42}))?;
    if let Some(line) = client.next().await {
        println!("<-- {}", line?);
    }

    drop(client);
    reader.await?;
    bus.shutdown().await;
    writer.await?;

    Ok(())
}
