use url::Url;

use crate::{
    error::{ChatError, ErrorCategory},
    types::ConversationRef,
};

/// Where the backend is reachable from, which decides the default base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    /// Backend on the same machine.
    #[default]
    Host,
    /// Android emulator, where the host loopback is `10.0.2.2`.
    AndroidEmulator,
}

impl Platform {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Host => "http://127.0.0.1:8000",
            Self::AndroidEmulator => "http://10.0.2.2:8000",
        }
    }
}

/// REST and realtime routes derived from one HTTP base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    http_base: Url,
    ws_base: Url,
}

impl Endpoints {
    /// Parse an `http(s)://` base; the socket base swaps in `ws(s)://`.
    pub fn new(http_base: &str) -> Result<Self, ChatError> {
        let mut http_base =
            Url::parse(http_base.trim()).map_err(|err| invalid_url(http_base, err))?;
        let ws_scheme = match http_base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ChatError::new(
                    ErrorCategory::Config,
                    "invalid_url",
                    format!("backend url must be http or https, got '{other}'"),
                ));
            }
        };

        if !http_base.path().ends_with('/') {
            let path = format!("{}/", http_base.path());
            http_base.set_path(&path);
        }

        let mut ws_base = http_base.clone();
        ws_base.set_scheme(ws_scheme).map_err(|()| {
            ChatError::new(
                ErrorCategory::Config,
                "invalid_url",
                format!("cannot derive realtime url from '{http_base}'"),
            )
        })?;

        Ok(Self { http_base, ws_base })
    }

    pub fn for_platform(platform: Platform) -> Self {
        match Self::new(platform.default_base_url()) {
            Ok(endpoints) => endpoints,
            Err(_) => unreachable!("platform default urls are valid"),
        }
    }

    pub fn http_base(&self) -> &Url {
        &self.http_base
    }

    pub fn ws_base(&self) -> &Url {
        &self.ws_base
    }

    pub fn me(&self) -> Url {
        self.api("api/me/")
    }

    pub fn token(&self) -> Url {
        self.api("api/token/")
    }

    pub fn register(&self) -> Url {
        self.api("api/register/")
    }

    pub fn channels(&self) -> Url {
        self.api("api/channels/")
    }

    pub fn chain_channels(&self) -> Url {
        self.api("api/chain_channels/")
    }

    pub fn dm_groups(&self) -> Url {
        self.api("api/dm-groups/")
    }

    pub fn users(&self) -> Url {
        self.api("api/users/")
    }

    /// History (GET) and persistence (POST) route for a conversation.
    pub fn messages(&self, conversation: ConversationRef) -> Url {
        self.api(&format!("api/messages/{}/", conversation.path_segment()))
    }

    /// Realtime socket for a conversation.
    pub fn realtime(&self, conversation: ConversationRef) -> Url {
        join(
            &self.ws_base,
            &format!("ws/chat/{}/", conversation.path_segment()),
        )
    }

    fn api(&self, path: &str) -> Url {
        join(&self.http_base, path)
    }
}

fn join(base: &Url, path: &str) -> Url {
    // Relative paths joined onto a base ending in '/' always parse.
    base.join(path).unwrap_or_else(|_| base.clone())
}

fn invalid_url(raw: &str, err: url::ParseError) -> ChatError {
    ChatError::new(
        ErrorCategory::Config,
        "invalid_url",
        format!("invalid backend url '{raw}': {err}"),
    )
}
