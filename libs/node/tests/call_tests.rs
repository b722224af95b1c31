mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{
    memory_client, spawn_server, start_memory_server, Delay, Empty, GetUserRequest, Identity,
    User, UserService,
};
use switchboard_fabric::codec::{Codec, JsonCodec};
use switchboard_fabric::transport::{
    HttpTransport, MemoryTransport, Socket, SocketHandler, TcpTransport, Transport,
};
use switchboard_fabric::{CallContext, Error as FabricError, Message, RemoteError};
use switchboard_node::broker::{Broker, MemoryBroker};
use switchboard_node::client::options::{context, timeout};
use switchboard_node::discovery::StaticDiscovery;
use switchboard_node::{Client, ClientError, Server, ServerError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn ada() -> User {
    User {
        id: 42,
        name: "Ada".to_string(),
    }
}

#[tokio::test]
async fn call_happy_path() {
    let transport = MemoryTransport::new();
    let _server = start_memory_server(&transport, "users-1").await;
    let client = memory_client(&transport, "users", "users-1");

    let mut user = User::default();
    client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 42 }, &mut user, [])
        .await
        .unwrap();

    assert_eq!(user, ada());
}

#[tokio::test]
async fn call_returns_structured_remote_error() {
    let transport = MemoryTransport::new();
    let _server = start_memory_server(&transport, "users-2").await;
    let client = memory_client(&transport, "users", "users-2");

    let mut user = User::default();
    let err = client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 7 }, &mut user, [])
        .await
        .unwrap_err();

    let status = err.status().expect("structured error");
    assert_eq!(status.status_code, 404);
    assert_eq!(status.id.as_deref(), Some("user.not_found"));
    assert!(err.to_string().contains("user not found"), "{err}");
    assert_eq!(user, User::default());
}

#[tokio::test]
async fn unknown_endpoint_comes_back_as_text() {
    let transport = MemoryTransport::new();
    let _server = start_memory_server(&transport, "users-3").await;
    let client = memory_client(&transport, "users", "users-3");

    let err = client
        .call("users", "UserService.Nope", &Empty {}, &mut Empty {}, [])
        .await
        .unwrap_err();

    match err {
        ClientError::Remote(RemoteError::Message(text)) => {
            assert!(text.contains("Endpoint not found"), "{text}")
        }
        other => panic!("Expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_service_is_a_discovery_error() {
    let transport = MemoryTransport::new();
    let client = memory_client(&transport, "users", "users-4");

    let err = client
        .call("billing", "Billing.Charge", &Empty {}, &mut Empty {}, [])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Discovery(_)));
}

#[tokio::test]
async fn unreachable_address_is_a_dial_error() {
    let transport = MemoryTransport::new();
    let client = memory_client(&transport, "users", "nobody-home");

    let err = client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 42 }, &mut User::default(), [])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Dial { address, .. } if address == "nobody-home"));
}

#[tokio::test]
async fn call_propagates_identity_from_context() {
    let transport = MemoryTransport::new();
    let _server = start_memory_server(&transport, "users-5").await;
    let client = memory_client(&transport, "users", "users-5");

    let parent = Uuid::new_v4();
    let ctx = CallContext::background()
        .with_parent_request(parent)
        .with_user_id(9);

    let mut identity = Identity::default();
    client
        .call("users", "UserService.Whoami", &Empty {}, &mut identity, [context(ctx)])
        .await
        .unwrap();

    assert_eq!(identity.user_id, Some(9));
    assert_eq!(identity.parent_header, Some(parent.to_string()));
    assert_eq!(identity.path.as_deref(), Some("UserService.Whoami"));
}

#[tokio::test]
async fn anonymous_user_is_not_propagated() {
    let transport = MemoryTransport::new();
    let _server = start_memory_server(&transport, "users-6").await;
    let client = memory_client(&transport, "users", "users-6");

    let mut identity = Identity::default();
    client
        .call(
            "users",
            "UserService.Whoami",
            &Empty {},
            &mut identity,
            [context(CallContext::background().with_user_id(0))],
        )
        .await
        .unwrap();

    assert_eq!(identity.user_id, None);
    assert_eq!(identity.parent_header, None);
}

#[tokio::test]
async fn call_timeout() {
    let transport = MemoryTransport::new();
    let _server = start_memory_server(&transport, "users-7").await;
    let client = memory_client(&transport, "users", "users-7");

    let request = Delay {
        millis: 2_000,
        tag: "slow".to_string(),
    };
    let err = client
        .call(
            "users",
            "UserService.Sleep",
            &request,
            &mut Delay::default(),
            [timeout(Duration::from_millis(50))],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Timeout(limit) if limit == Duration::from_millis(50)));
}

#[tokio::test]
async fn client_default_timeout_applies() {
    let transport = MemoryTransport::new();
    let _server = start_memory_server(&transport, "users-8").await;
    let client = memory_client(&transport, "users", "users-8").with_timeout(Duration::from_millis(50));

    let request = Delay {
        millis: 2_000,
        tag: "slow".to_string(),
    };
    let err = client
        .call("users", "UserService.Sleep", &request, &mut Delay::default(), [])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)));
}

#[tokio::test]
async fn cancelled_context_aborts_call() {
    let transport = MemoryTransport::new();
    let _server = start_memory_server(&transport, "users-9").await;
    let client = memory_client(&transport, "users", "users-9");

    let token = CancellationToken::new();
    token.cancel();
    let ctx = CallContext::background().with_cancellation(token);

    let err = client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 42 }, &mut User::default(), [context(ctx)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Dial {
            source: FabricError::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn concurrent_requests_on_one_connection_are_correlated() {
    let transport = MemoryTransport::new();
    let _server = start_memory_server(&transport, "users-10").await;

    let ctx = CallContext::background();
    let socket = transport.dial(&ctx, "users-10").await.unwrap();

    let mut expected = HashMap::new();
    for (tag, millis) in [("A", 300), ("B", 10)] {
        let mut message = Message::with_data(
            JsonCodec
                .encode(&Delay {
                    millis,
                    tag: tag.to_string(),
                })
                .unwrap(),
        );
        message.headers.set_path("UserService.Sleep");
        let id = message.headers.set_random_request_id();
        expected.insert(id, tag.to_string());

        socket.send(&ctx, &message).await.unwrap();
    }

    let mut order = Vec::new();
    for _ in 0..2 {
        let response = socket.receive(&ctx).await.unwrap();
        assert!(response.headers.error().is_none());

        let reply: Delay = JsonCodec.decode(&response.data).unwrap();
        let id = response.headers.request_id().unwrap();
        assert_eq!(expected.remove(&id), Some(reply.tag.clone()));
        order.push(reply.tag);
    }

    // The slow request does not hold up the fast one
    assert_eq!(order, vec!["B", "A"]);
    socket.close().await.unwrap();
}

#[tokio::test]
async fn request_without_path_gets_error_response() {
    let transport = MemoryTransport::new();
    let _server = start_memory_server(&transport, "users-11").await;

    let ctx = CallContext::background();
    let socket = transport.dial(&ctx, "users-11").await.unwrap();

    let mut message = Message::new();
    let id = message.headers.set_random_request_id();
    socket.send(&ctx, &message).await.unwrap();

    let response = socket.receive(&ctx).await.unwrap();
    assert_eq!(response.headers.request_id(), Some(id));
    match response.headers.error() {
        Some(RemoteError::Message(text)) => assert!(text.contains("Malformed request path")),
        other => panic!("Expected malformed path error, got {other:?}"),
    }
    assert!(response.data.is_empty());
}

#[tokio::test]
async fn mismatched_response_is_dropped() {
    let transport = MemoryTransport::new();
    let mut listener = transport
        .listen(&CallContext::background(), "impostor")
        .await
        .unwrap();

    // Answers every request twice: once with a stranger's id, then properly
    let handler: SocketHandler = Arc::new(|socket: Box<dyn Socket>| {
        tokio::spawn(async move {
            let ctx = CallContext::background();
            let request = socket.receive(&ctx).await.unwrap();

            let mut stray = Message::with_data(JsonCodec.encode(&User::default()).unwrap());
            stray.headers.set_random_request_id();
            socket.send(&ctx, &stray).await.unwrap();

            let mut reply = Message::response_to(&request);
            reply.data = JsonCodec.encode(&ada()).unwrap();
            socket.send(&ctx, &reply).await.unwrap();
        });
    });
    tokio::spawn(async move { listener.accept(&CallContext::background(), handler).await });

    let client = memory_client(&transport, "users", "impostor");
    let mut user = User::default();
    client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 42 }, &mut user, [])
        .await
        .unwrap();
    assert_eq!(user, ada());
}

#[tokio::test]
async fn shutdown_stops_serving() {
    let transport = MemoryTransport::new();
    let mut server = Server::new(transport.clone(), JsonCodec, "users-12");
    server.add_handler(UserService, "", &[]).unwrap();
    let server = Arc::new(server);

    let listener = server.listen().await.unwrap();
    let serving = Arc::clone(&server);
    let task = tokio::spawn(async move { serving.serve(listener).await });

    let client = memory_client(&transport, "users", "users-12");
    let mut user = User::default();
    client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 42 }, &mut user, [])
        .await
        .unwrap();

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let err = client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 42 }, &mut user, [])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Dial { .. }));
}

#[tokio::test]
async fn handlers_cannot_be_added_after_serving() {
    let transport = MemoryTransport::new();
    let mut server = Server::new(transport, JsonCodec, "users-13");

    let listener = server.listen().await.unwrap();
    server.shutdown();
    server.serve(listener).await.unwrap();

    assert!(matches!(
        server.add_handler(UserService, "", &[]),
        Err(ServerError::AlreadyServing)
    ));
}

#[tokio::test]
async fn stopped_server_cannot_be_restarted() {
    let transport = MemoryTransport::new();
    let server = Server::new(transport, JsonCodec, "users-13b");

    let listener = server.listen().await.unwrap();
    server.shutdown();
    server.serve(listener).await.unwrap();

    let restarted = tokio::time::timeout(Duration::from_secs(1), server.start())
        .await
        .unwrap();
    assert!(matches!(restarted, Err(ServerError::ShutDown)));
}

#[tokio::test]
async fn publish_reaches_typed_subscriber() {
    let broker = Arc::new(MemoryBroker::new());
    broker.connect().await.unwrap();

    let transport = MemoryTransport::new();
    let server = Server::new(transport.clone(), JsonCodec, "users-14").with_broker(broker.clone());
    let client = memory_client(&transport, "users", "users-14").with_broker(broker.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe("users.created", move |user: User| {
            let _ = tx.send(user);
        })
        .await
        .unwrap();

    // Undecodable payloads never reach the callback
    broker
        .publish("users.created", b"not a user".to_vec())
        .await
        .unwrap();
    server
        .publish(&CallContext::background(), "users.created", &ada())
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, ada());
}

#[tokio::test]
async fn broker_is_required_for_pubsub() {
    let transport = MemoryTransport::new();
    let server = Server::new(transport.clone(), JsonCodec, "users-15");
    let client = memory_client(&transport, "users", "users-15");

    assert!(matches!(
        server
            .publish(&CallContext::background(), "topic", &ada())
            .await,
        Err(ServerError::NoBroker)
    ));
    assert!(matches!(
        client.subscribe("topic", |_user: User| {}).await,
        Err(ClientError::NoBroker)
    ));
}

#[tokio::test]
async fn call_over_tcp() {
    let mut server = Server::new(TcpTransport::new(), JsonCodec, "127.0.0.1:0");
    server.add_handler(UserService, "", &[]).unwrap();
    let server = Arc::new(server);

    let listener = server.listen().await.unwrap();
    let address = listener.local_addr().unwrap();
    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve(listener).await });

    let client = Client::new(
        TcpTransport::new().connect_timeout(Duration::from_secs(5)),
        StaticDiscovery::new().with("users", address),
        JsonCodec,
    );

    let mut user = User::default();
    client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 42 }, &mut user, [])
        .await
        .unwrap();
    assert_eq!(user, ada());

    let err = client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 1 }, &mut user, [])
        .await
        .unwrap_err();
    assert_eq!(err.status().unwrap().status_code, 404);

    server.shutdown();
}

#[tokio::test]
async fn call_over_http() {
    let mut server = Server::new(HttpTransport::new(), JsonCodec, "127.0.0.1:0");
    server.add_handler(UserService, "", &[]).unwrap();
    let server = Arc::new(server);

    let listener = server.listen().await.unwrap();
    let address = listener.local_addr().unwrap();
    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve(listener).await });

    let client = Client::new(
        HttpTransport::new().request_timeout(Duration::from_secs(5)),
        StaticDiscovery::new().with("users", address),
        JsonCodec,
    );

    let mut user = User::default();
    client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 42 }, &mut user, [])
        .await
        .unwrap();
    assert_eq!(user, ada());

    let err = client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 3 }, &mut user, [])
        .await
        .unwrap_err();
    assert_eq!(err.status().unwrap().status_code, 404);
    assert!(err.to_string().contains("user not found"));

    server.shutdown();
}

#[tokio::test]
async fn allowlisted_handler_under_custom_name() {
    let transport = MemoryTransport::new();
    let mut server = Server::new(transport.clone(), JsonCodec, "users-16").with_max_in_flight(1);
    server.add_handler(UserService, "Users", &["GetUser"]).unwrap();
    let _server = spawn_server(server).await;

    let client = memory_client(&transport, "users", "users-16");
    let mut user = User::default();
    client
        .call("users", "Users.GetUser", &GetUserRequest { id: 42 }, &mut user, [])
        .await
        .unwrap();
    assert_eq!(user, ada());

    let err = client
        .call("users", "Users.Whoami", &Empty {}, &mut Identity::default(), [])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(_)));
}

#[tokio::test]
async fn call_with_bincode_payloads() {
    use switchboard_fabric::codec::BincodeCodec;

    let transport = MemoryTransport::new();
    let mut server = Server::new(transport.clone(), BincodeCodec, "users-17");
    server.add_handler(UserService, "", &[]).unwrap();
    let server = Arc::new(server);
    let listener = server.listen().await.unwrap();
    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve(listener).await });

    let client = Client::new(
        transport.clone(),
        StaticDiscovery::new().with("users", "users-17"),
        BincodeCodec,
    );

    let mut user = User::default();
    client
        .call("users", "UserService.GetUser", &GetUserRequest { id: 42 }, &mut user, [])
        .await
        .unwrap();
    assert_eq!(user, ada());
}
