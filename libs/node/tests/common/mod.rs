#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_fabric::codec::JsonCodec;
use switchboard_fabric::transport::MemoryTransport;
use switchboard_node::prelude::*;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetUserRequest {
    pub id: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Option<u32>,
    pub parent_header: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delay {
    pub millis: u64,
    pub tag: String,
}

pub struct UserService;

#[handler]
impl UserService {
    pub async fn get_user(
        &self,
        _ctx: &CallContext,
        input: &GetUserRequest,
        output: &mut User,
    ) -> Result<(), Status> {
        if input.id != 42 {
            return Err(Status::not_found_id("user.not_found", "user not found"));
        }

        *output = User {
            id: 42,
            name: "Ada".to_string(),
        };
        Ok(())
    }

    pub async fn whoami(
        &self,
        ctx: &CallContext,
        _input: &Empty,
        output: &mut Identity,
    ) -> Result<(), Status> {
        let request = ctx.request();
        *output = Identity {
            user_id: ctx.user_id(),
            parent_header: request
                .and_then(|r| r.headers.parent_request_id())
                .map(|id| id.to_string()),
            path: request.and_then(|r| r.headers.path()).map(str::to_string),
        };
        Ok(())
    }

    pub async fn sleep(
        &self,
        _ctx: &CallContext,
        input: &Delay,
        output: &mut Delay,
    ) -> Result<(), Status> {
        tokio::time::sleep(Duration::from_millis(input.millis)).await;
        *output = input.clone();
        Ok(())
    }

    pub async fn fail(
        &self,
        _ctx: &CallContext,
        _input: &Empty,
        _output: &mut Empty,
    ) -> Result<(), std::io::Error> {
        Err(std::io::Error::other("disk on fire"))
    }

    // Takes its input by value; not an endpoint
    pub async fn by_value(
        &self,
        _ctx: &CallContext,
        input: GetUserRequest,
        output: &mut User,
    ) -> Result<(), Status> {
        output.id = input.id;
        Ok(())
    }

    // Returns its output; not an endpoint
    pub async fn returns_output(
        &self,
        _ctx: &CallContext,
        input: &GetUserRequest,
    ) -> Result<User, Status> {
        Ok(User {
            id: input.id,
            name: String::new(),
        })
    }
}

/// Start a server for [`UserService`] on a memory address
pub async fn start_memory_server(
    transport: &MemoryTransport,
    address: &str,
) -> Arc<Server<JsonCodec>> {
    let mut server = Server::new(transport.clone(), JsonCodec, address);
    server.add_handler(UserService, "", &[]).unwrap();
    spawn_server(server).await
}

/// Listen, then serve on a background task
pub async fn spawn_server(server: Server<JsonCodec>) -> Arc<Server<JsonCodec>> {
    let server = Arc::new(server);
    let listener = server.listen().await.unwrap();

    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve(listener).await });

    server
}

pub fn memory_client(transport: &MemoryTransport, service: &str, address: &str) -> Client<JsonCodec> {
    Client::new(
        transport.clone(),
        StaticDiscovery::new().with(service, address),
        JsonCodec,
    )
}
