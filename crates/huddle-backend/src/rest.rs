//! REST client for the chat backend.

use std::time::Duration;

use async_trait::async_trait;
use huddle_core::{
    ChannelSummary, ChatApi, ChatError, ConversationRef, Directory, DmGroup, Endpoints,
    ErrorCategory, Participant, UserProfile, WireMessage,
};
use huddle_platform::{TokenPair, TokenVault};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{map_credential_error, map_decode_error, map_request_error, map_status_error};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// The backend only has one workspace; new channels land in it.
const DEFAULT_WORKSPACE_ID: u64 = 1;

/// Authenticated JSON client over [`Endpoints`], with tokens in a [`TokenVault`].
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    endpoints: Endpoints,
    vault: TokenVault,
}

impl RestClient {
    pub fn new(endpoints: Endpoints, vault: TokenVault) -> Result<Self, ChatError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| {
                ChatError::new(
                    ErrorCategory::Config,
                    "http_client_build_failed",
                    err.to_string(),
                )
            })?;

        Ok(Self {
            http,
            endpoints,
            vault,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn vault(&self) -> &TokenVault {
        &self.vault
    }

    /// Exchange credentials for a token pair and store it.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ChatError> {
        let username = username.trim();
        require_credentials(username, password)?;

        let tokens: TokenPair = self
            .send_json(
                "login",
                self.http
                    .post(self.endpoints.token())
                    .json(&json!({ "username": username, "password": password })),
            )
            .await?;
        self.vault
            .save(&tokens)
            .map_err(|err| map_credential_error("login", err))?;

        info!(%username, "logged in");
        Ok(tokens)
    }

    /// Create an account; the server answers with a token pair, which is stored.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<TokenPair, ChatError> {
        let username = username.trim();
        require_credentials(username, password)?;

        let tokens: TokenPair = self
            .send_json(
                "register",
                self.http.post(self.endpoints.register()).json(&json!({
                    "username": username,
                    "email": email.trim(),
                    "password": password,
                })),
            )
            .await?;
        self.vault
            .save(&tokens)
            .map_err(|err| map_credential_error("register", err))?;

        info!(%username, "registered");
        Ok(tokens)
    }

    pub fn logout(&self) -> Result<(), ChatError> {
        self.vault
            .clear()
            .map_err(|err| map_credential_error("logout", err))?;
        info!("logged out");
        Ok(())
    }

    pub async fn me(&self) -> Result<UserProfile, ChatError> {
        self.get_json("load profile", self.endpoints.me()).await
    }

    pub async fn channels(&self) -> Result<Vec<ChannelSummary>, ChatError> {
        self.get_json("load channels", self.endpoints.channels())
            .await
    }

    pub async fn chain_channels(&self) -> Result<Vec<ChannelSummary>, ChatError> {
        let mut channels: Vec<ChannelSummary> = self
            .get_json("load chain channels", self.endpoints.chain_channels())
            .await?;
        for channel in &mut channels {
            channel.is_chain = true;
        }
        Ok(channels)
    }

    pub async fn dm_groups(&self) -> Result<Vec<DmGroup>, ChatError> {
        self.get_json("load direct messages", self.endpoints.dm_groups())
            .await
    }

    pub async fn users(&self) -> Result<Vec<Participant>, ChatError> {
        self.get_json("load users", self.endpoints.users()).await
    }

    /// Fetch every home-screen list concurrently. Each list that fails is
    /// logged and left empty.
    pub async fn directory(&self) -> Directory {
        let (channels, chain_channels, dm_groups, users) = tokio::join!(
            self.channels(),
            self.chain_channels(),
            self.dm_groups(),
            self.users()
        );

        Directory {
            channels: or_empty("channels", channels),
            chain_channels: or_empty("chain channels", chain_channels),
            dm_groups: or_empty("direct messages", dm_groups),
            users: or_empty("users", users),
        }
    }

    /// Create a channel in the default workspace. Blank names do nothing.
    pub async fn create_channel(&self, name: &str) -> Result<Option<ChannelSummary>, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }

        let request = self
            .authorized("create channel", self.http.post(self.endpoints.channels()))?
            .json(&json!({ "name": name, "workspace": DEFAULT_WORKSPACE_ID }));
        let channel: ChannelSummary = self.send_json("create channel", request).await?;
        info!(channel = channel.id, name = %channel.name, "channel created");
        Ok(Some(channel))
    }

    /// Open (or reuse) the DM group between the current user and `user_id`.
    pub async fn create_dm_group(&self, user_id: u64) -> Result<DmGroup, ChatError> {
        let request = self
            .authorized("create direct message", self.http.post(self.endpoints.dm_groups()))?
            .json(&json!({ "participants": [user_id] }));
        let group: DmGroup = self.send_json("create direct message", request).await?;
        info!(dm_group = group.id, "direct message group ready");
        Ok(group)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: Url,
    ) -> Result<T, ChatError> {
        let request = self.authorized(operation, self.http.get(url))?;
        self.send_json(operation, request).await
    }

    async fn post_authorized<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        url: Url,
        body: &B,
    ) -> Result<(), ChatError> {
        let request = self.authorized(operation, self.http.post(url))?.json(body);
        let response = self.send(operation, request).await?;
        debug!(operation, status = response.status().as_u16(), "request accepted");
        Ok(())
    }

    fn authorized(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<RequestBuilder, ChatError> {
        let token = self
            .vault
            .access_token()
            .map_err(|err| map_credential_error(operation, err))?
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ChatError::auth_missing(operation))?;
        Ok(request.bearer_auth(token))
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, ChatError> {
        let response = request
            .send()
            .await
            .map_err(|err| map_request_error(operation, err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = map_status_error(operation, status.as_u16(), &body);
        warn!(operation, status = status.as_u16(), error = %err, "request rejected");
        Err(err)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, ChatError> {
        let body = self
            .send(operation, request)
            .await?
            .bytes()
            .await
            .map_err(|err| map_request_error(operation, err))?;
        serde_json::from_slice(&body).map_err(|err| map_decode_error(operation, err))
    }
}

#[async_trait]
impl ChatApi for RestClient {
    fn has_credentials(&self) -> bool {
        self.vault.has_access_token()
    }

    async fn current_user(&self) -> Result<Participant, ChatError> {
        self.me().await.map(|profile| profile.participant())
    }

    async fn fetch_history(
        &self,
        conversation: ConversationRef,
    ) -> Result<Vec<WireMessage>, ChatError> {
        let items: Vec<WireMessage> = self
            .get_json("load history", self.endpoints.messages(conversation))
            .await?;
        debug!(%conversation, count = items.len(), "history fetched");
        Ok(items)
    }

    async fn persist_message(
        &self,
        conversation: ConversationRef,
        content: &str,
    ) -> Result<(), ChatError> {
        self.post_authorized(
            "persist message",
            self.endpoints.messages(conversation),
            &json!({ "content": content }),
        )
        .await
    }
}

fn require_credentials(username: &str, password: &str) -> Result<(), ChatError> {
    if username.is_empty() || password.is_empty() {
        return Err(ChatError::new(
            ErrorCategory::Config,
            "credentials_required",
            "username and password are required",
        ));
    }
    Ok(())
}

fn or_empty<T>(list: &str, result: Result<Vec<T>, ChatError>) -> Vec<T> {
    result.unwrap_or_else(|err| {
        warn!(list, error = %err, "directory list unavailable; showing it empty");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, Method, StatusCode, Uri, header::AUTHORIZATION},
        routing::{MethodFilter, MethodRouter},
    };
    use huddle_platform::MemoryCredentialStore;
    use serde_json::Value;
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Debug, Clone)]
    struct Recorded {
        method: String,
        path: String,
        authorization: Option<String>,
        body: String,
    }

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<Recorded>>>,
    }

    impl Captured {
        fn record(&self, method: &Method, uri: &Uri, headers: &HeaderMap, body: String) {
            let authorization = headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            self.requests.lock().expect("requests lock").push(Recorded {
                method: method.to_string(),
                path: uri.path().to_owned(),
                authorization,
                body,
            });
        }
    }

    /// Loopback backend answering each `(method, path)` with a canned status and body.
    struct TestServer {
        base: String,
        captured: Captured,
    }

    impl TestServer {
        async fn start(routes: Vec<(&str, &str, u16, Value)>) -> Self {
            let captured = Captured::default();

            let mut by_path: HashMap<String, MethodRouter<Captured>> = HashMap::new();
            for (method, path, status, payload) in routes {
                let method = Method::from_bytes(method.as_bytes()).expect("valid method");
                let filter = MethodFilter::try_from(method).expect("routable method");
                let status = StatusCode::from_u16(status).expect("valid status");
                let handler = move |State(captured): State<Captured>,
                                    method: Method,
                                    uri: Uri,
                                    headers: HeaderMap,
                                    body: String| async move {
                    captured.record(&method, &uri, &headers, body);
                    (status, Json(payload))
                };
                let methods = by_path.remove(path).unwrap_or_else(MethodRouter::new);
                by_path.insert(path.to_owned(), methods.on(filter, handler));
            }

            let router = by_path
                .into_iter()
                .fold(Router::new(), |router, (path, methods)| {
                    router.route(&path, methods)
                })
                .fallback(not_found)
                .with_state(captured.clone());

            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind loopback listener");
            let base = format!("http://{}", listener.local_addr().expect("local addr"));
            tokio::spawn(async move {
                let _ = axum::serve(listener, router).await;
            });

            Self { base, captured }
        }

        fn requests(&self) -> Vec<Recorded> {
            self.captured.requests.lock().expect("requests lock").clone()
        }
    }

    async fn not_found(
        State(captured): State<Captured>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: String,
    ) -> (StatusCode, Json<Value>) {
        captured.record(&method, &uri, &headers, body);
        (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not found." })))
    }

    fn client(base: &str) -> RestClient {
        let vault = TokenVault::new(Arc::new(MemoryCredentialStore::default()), "huddle-test");
        RestClient::new(Endpoints::new(base).expect("valid base"), vault).expect("client builds")
    }

    fn logged_in(base: &str) -> RestClient {
        let client = client(base);
        client
            .vault()
            .save(&TokenPair {
                access: "tok".into(),
                refresh: Some("ref".into()),
            })
            .expect("seed tokens");
        client
    }

    #[tokio::test]
    async fn login_stores_tokens() {
        let server = TestServer::start(vec![(
            "POST",
            "/api/token/",
            200,
            json!({ "access": "a1", "refresh": "r1" }),
        )])
        .await;
        let client = client(&server.base);
        assert!(!client.has_credentials());

        let tokens = client.login(" alice ", "pw").await.expect("login should work");

        assert_eq!(tokens.access, "a1");
        assert!(client.has_credentials());
        assert_eq!(client.vault().refresh_token().expect("read"), Some("r1".into()));
        let body: Value =
            serde_json::from_str(&server.requests()[0].body).expect("login body is JSON");
        assert_eq!(body, json!({ "username": "alice", "password": "pw" }));
    }

    #[tokio::test]
    async fn login_rejection_surfaces_detail_and_keeps_logged_out() {
        let server = TestServer::start(vec![(
            "POST",
            "/api/token/",
            401,
            json!({ "detail": "No active account found with the given credentials" }),
        )])
        .await;
        let client = client(&server.base);

        let err = client.login("alice", "bad").await.expect_err("login must fail");
        assert_eq!(err.category, ErrorCategory::Auth);
        assert!(err.message.contains("No active account found"));
        assert!(!client.has_credentials());
    }

    #[tokio::test]
    async fn blank_credentials_never_reach_the_server() {
        let server = TestServer::start(Vec::new()).await;
        let client = client(&server.base);

        let err = client.login("  ", "pw").await.expect_err("blank username");
        assert_eq!(err.code, "credentials_required");
        let err = client.register("bob", "b@example.org", "").await.expect_err("blank password");
        assert_eq!(err.code, "credentials_required");
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn register_stores_returned_tokens() {
        let server = TestServer::start(vec![(
            "POST",
            "/api/register/",
            201,
            json!({ "detail": "User registered successfully.", "access": "a2", "refresh": "r2" }),
        )])
        .await;
        let client = client(&server.base);

        client
            .register("bob", "bob@example.org", "pw")
            .await
            .expect("register should work");
        assert_eq!(client.vault().access_token().expect("read"), Some("a2".into()));

        client.logout().expect("logout should work");
        assert!(!client.has_credentials());
    }

    #[tokio::test]
    async fn history_uses_bearer_token_and_tolerates_shapes() {
        let server = TestServer::start(vec![(
            "GET",
            "/api/messages/channel/5/",
            200,
            json!([
                {
                    "id": 1,
                    "sender": "alice",
                    "content": "hi",
                    "timestamp": "2024-01-01T00:00:00Z"
                },
                { "id": 2, "sender": { "id": 2, "username": "bob" }, "message": "yo" }
            ]),
        )])
        .await;
        let client = logged_in(&server.base);

        let items = client
            .fetch_history(ConversationRef::Channel(5))
            .await
            .expect("history should load");

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text.as_deref(), Some("hi"));
        assert_eq!(items[1].text.as_deref(), Some("yo"));
        assert_eq!(
            server.requests()[0].authorization.as_deref(),
            Some("Bearer tok")
        );
    }

    #[tokio::test]
    async fn authenticated_calls_without_token_fail_locally() {
        let server = TestServer::start(Vec::new()).await;
        let client = client(&server.base);

        let err = client
            .fetch_history(ConversationRef::Dm(1))
            .await
            .expect_err("history needs a token");
        assert_eq!(err.code, "auth_missing");
        let err = client
            .persist_message(ConversationRef::Dm(1), "hi")
            .await
            .expect_err("persist needs a token");
        assert_eq!(err.code, "auth_missing");
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn persist_posts_content_only() {
        let server = TestServer::start(vec![(
            "POST",
            "/api/messages/dm/3/",
            201,
            json!({ "id": 9, "sender": "alice", "content": "hello" }),
        )])
        .await;
        let client = logged_in(&server.base);

        client
            .persist_message(ConversationRef::Dm(3), "hello")
            .await
            .expect("persist should work");

        let request = &server.requests()[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/api/messages/dm/3/");
        let body: Value = serde_json::from_str(&request.body).expect("body is JSON");
        assert_eq!(body, json!({ "content": "hello" }));
    }

    #[tokio::test]
    async fn directory_degrades_each_list_independently() {
        let server = TestServer::start(vec![
            (
                "GET",
                "/api/channels/",
                200,
                json!([{ "id": 1, "name": "general", "workspace": 1, "is_chain": false }]),
            ),
            ("GET", "/api/chain_channels/", 500, json!({ "detail": "boom" })),
            (
                "GET",
                "/api/dm-groups/",
                200,
                json!([{ "id": 4, "participants": [
                    { "id": 1, "username": "alice", "email": "" },
                    { "id": 2, "username": "bob", "email": "" }
                ] }]),
            ),
            ("GET", "/api/users/", 200, json!("not a list")),
        ])
        .await;
        let client = logged_in(&server.base);

        let directory = client.directory().await;

        assert_eq!(directory.channels.len(), 1);
        assert!(directory.chain_channels.is_empty());
        assert_eq!(directory.dm_groups.len(), 1);
        assert!(directory.users.is_empty());
        assert_eq!(
            directory.dm_groups[0].display_name(&Participant::new(1, "alice")),
            "bob"
        );
    }

    #[tokio::test]
    async fn chain_channels_are_flagged() {
        let server = TestServer::start(vec![(
            "GET",
            "/api/chain_channels/",
            200,
            json!([{ "id": 8, "name": "relay" }]),
        )])
        .await;
        let client = logged_in(&server.base);

        let chains = client.chain_channels().await.expect("chain channels load");
        assert!(chains[0].is_chain);
    }

    #[tokio::test]
    async fn creates_channels_and_dm_groups() {
        let server = TestServer::start(vec![
            (
                "POST",
                "/api/channels/",
                201,
                json!({ "id": 12, "name": "random", "workspace": 1 }),
            ),
            (
                "POST",
                "/api/dm-groups/",
                200,
                json!({ "id": 4, "participants": [
                    { "id": 1, "username": "alice" },
                    { "id": 2, "username": "bob" }
                ] }),
            ),
        ])
        .await;
        let client = logged_in(&server.base);

        assert_eq!(client.create_channel("   ").await.expect("blank is a no-op"), None);
        let channel = client
            .create_channel(" random ")
            .await
            .expect("create channel")
            .expect("channel returned");
        assert_eq!(channel.title(), "#random");

        let group = client.create_dm_group(2).await.expect("create dm");
        assert_eq!(group.conversation(), ConversationRef::Dm(4));

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        let channel_body: Value = serde_json::from_str(&requests[0].body).expect("JSON");
        assert_eq!(channel_body, json!({ "name": "random", "workspace": 1 }));
        let dm_body: Value = serde_json::from_str(&requests[1].body).expect("JSON");
        assert_eq!(dm_body, json!({ "participants": [2] }));
    }

    #[tokio::test]
    async fn current_user_resolves_participant() {
        let server = TestServer::start(vec![(
            "GET",
            "/api/me/",
            200,
            json!({ "id": 7, "username": "carol", "email": "c@example.org" }),
        )])
        .await;
        let client = logged_in(&server.base);

        let me = client.current_user().await.expect("me should load");
        assert_eq!(me, Participant::new(7, "carol"));
    }

    #[tokio::test]
    async fn malformed_bodies_are_decode_errors() {
        let server =
            TestServer::start(vec![("GET", "/api/me/", 200, json!({ "name": "x" }))]).await;
        let client = logged_in(&server.base);

        let err = client.me().await.expect_err("missing fields must fail");
        assert_eq!(err.code, "decode_failed");
        assert_eq!(err.category, ErrorCategory::Serialization);
    }

    #[tokio::test]
    #[ignore = "requires a running backend and HUDDLE_LIVE_* credentials"]
    async fn live_login_and_directory() {
        let (Ok(url), Ok(user), Ok(password)) = (
            std::env::var("HUDDLE_LIVE_URL"),
            std::env::var("HUDDLE_LIVE_USER"),
            std::env::var("HUDDLE_LIVE_PASSWORD"),
        ) else {
            return;
        };
        let client = client(&url);
        client.login(&user, &password).await.expect("live login");
        let me = client.me().await.expect("live me");
        assert_eq!(me.username, user);
        let _ = client.directory().await;
    }
}
