//! Login flow state machine.
//!
//! States and guarded transitions:
//!
//! ```text
//! idle → loading → methods → {otp-input → otp-verify → otp-name,
//!                              oauth-pending, web3-pending}
//!                                 ↓
//!                          username-required → authenticated → logout
//! ```
//!
//! Failures are recorded beside the state and never terminate the flow;
//! `cancel()` always returns to the method list (or idle before one was
//! fetched). Terminal transitions persist the session and propagate it to
//! sibling tabs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use threadkit_client_common::storage::{clear_session, load_session, save_session};
use threadkit_client_common::types::{AuthMethod, AuthMethodKind, Session};
use threadkit_client_common::{BusMessage, CrossTabBus, Error, ErrorKind, Result, TokenStorage};
use threadkit_client_http::api::{
    AuthResponse, CheckUsernameResponse, OtpTarget, UpdateMeRequest, Web3VerifyRequest,
};
use threadkit_client_http::{ApiClient, TokenSlot};

use crate::signer::WalletSigner;

/// Debounce applied to availability queries while the user types a handle.
const USERNAME_CHECK_DEBOUNCE: Duration = Duration::from_millis(400);

#[derive(Debug, Clone)]
pub enum AuthState {
    Idle,
    Loading,
    Methods {
        methods: Vec<AuthMethod>,
    },
    OtpInput {
        method: AuthMethod,
    },
    OtpVerify {
        method: AuthMethod,
        target: OtpTarget,
    },
    /// The code checked out but the account is new and needs a handle.
    OtpName {
        method: AuthMethod,
        target: OtpTarget,
        code: String,
    },
    OauthPending {
        method: AuthMethod,
    },
    Web3Pending {
        method: AuthMethod,
    },
    UsernameRequired {
        session: Session,
    },
    Authenticated {
        session: Session,
    },
}

/// Observable state plus the most recent in-flow error, if any.
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub error: Option<String>,
}

pub struct AuthManager {
    api: ApiClient,
    storage: Arc<dyn TokenStorage>,
    token: TokenSlot,
    bus: CrossTabBus,
    state: watch::Sender<AuthSnapshot>,
    last_methods: Mutex<Vec<AuthMethod>>,
    username_check_generation: AtomicU64,
}

impl AuthManager {
    /// Construct and rehydrate. A persisted session comes back as
    /// `authenticated` immediately; call [`AuthManager::refresh_user`] to
    /// re-fetch the profile snapshot.
    pub fn new(api: ApiClient, storage: Arc<dyn TokenStorage>, bus: CrossTabBus) -> Arc<Self> {
        let token = api.transport().token_slot();

        let initial = match load_session(storage.as_ref()) {
            Some(session) => {
                token.set(&session.token);
                AuthState::Authenticated { session }
            }
            None => AuthState::Idle,
        };

        let (state, _) = watch::channel(AuthSnapshot {
            state: initial,
            error: None,
        });

        let manager = Arc::new(Self {
            api,
            storage,
            token,
            bus,
            state,
            last_methods: Mutex::new(Vec::new()),
            username_check_generation: AtomicU64::new(0),
        });

        if let Some(rx) = manager.bus.subscribe_auth() {
            let weak = Arc::downgrade(&manager);
            tokio::spawn(async move {
                let mut rx = rx;
                while let Ok(message) = rx.recv().await {
                    let Some(manager) = weak.upgrade() else { break };
                    match message {
                        BusMessage::Login(session) => manager.adopt_login(*session),
                        BusMessage::Logout => manager.adopt_logout(),
                        BusMessage::Vote(_) => {}
                    }
                }
            });
        }

        manager
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        match &self.state.borrow().state {
            AuthState::Authenticated { session } | AuthState::UsernameRequired { session } => {
                Some(session.clone())
            }
            _ => None,
        }
    }

    fn set(&self, state: AuthState, error: Option<String>) {
        self.state.send_replace(AuthSnapshot { state, error });
    }

    fn methods_or_idle(&self) -> AuthState {
        let methods = self.last_methods.lock().expect("methods lock").clone();
        if methods.is_empty() {
            AuthState::Idle
        } else {
            AuthState::Methods { methods }
        }
    }

    // === Flow operations ===

    /// idle → loading → methods. Fetches the site's enabled auth methods.
    pub async fn start_login(&self) -> Result<()> {
        self.set(AuthState::Loading, None);
        match self.api.auth_methods().await {
            Ok(methods) => {
                *self.last_methods.lock().expect("methods lock") = methods.clone();
                self.set(AuthState::Methods { methods }, None);
                Ok(())
            }
            Err(err) => {
                self.set(AuthState::Idle, Some(err.message.clone()));
                Err(err)
            }
        }
    }

    /// Pick a method from the fetched list.
    pub fn select_method(&self, method_id: &str) -> Result<()> {
        let snapshot = self.snapshot();
        let AuthState::Methods { methods } = snapshot.state else {
            return Err(Error::validation("no method list to select from"));
        };
        let method = methods
            .iter()
            .find(|m| m.id == method_id)
            .cloned()
            .ok_or_else(|| Error::validation(format!("unknown auth method `{method_id}`")))?;

        let next = match method.kind {
            AuthMethodKind::Otp => AuthState::OtpInput { method },
            AuthMethodKind::Oauth => AuthState::OauthPending { method },
            AuthMethodKind::Web3 => AuthState::Web3Pending { method },
            AuthMethodKind::Anonymous => {
                return Err(Error::validation("anonymous posting needs no login"));
            }
        };
        self.set(next, None);
        Ok(())
    }

    /// otp-input → otp-verify.
    pub async fn send_otp(&self, target: OtpTarget) -> Result<()> {
        let snapshot = self.snapshot();
        let method = match snapshot.state {
            AuthState::OtpInput { method } => method,
            // Re-send from the verify screen keeps the flow where it is.
            AuthState::OtpVerify { method, .. } => method,
            _ => return Err(Error::validation("not in an OTP flow")),
        };

        match self.api.send_otp(&target).await {
            Ok(()) => {
                self.set(AuthState::OtpVerify { method, target }, None);
                Ok(())
            }
            Err(err) => {
                self.set(AuthState::OtpInput { method }, Some(err.message.clone()));
                Err(err)
            }
        }
    }

    /// otp-verify (or otp-name, with the stored code) → session or otp-name.
    pub async fn verify_otp(&self, code: &str, name: Option<&str>) -> Result<()> {
        let snapshot = self.snapshot();
        let (method, target, code) = match snapshot.state {
            AuthState::OtpVerify { method, target } => (method, target, code.to_string()),
            AuthState::OtpName { method, target, code } => (method, target, code),
            _ => return Err(Error::validation("no code to verify")),
        };

        match self.api.verify_otp(&target, &code, name).await {
            Ok(response) => {
                self.complete_session(response);
                Ok(())
            }
            Err(err)
                if err.kind == ErrorKind::Validation
                    && name.is_none()
                    && err.message.to_lowercase().contains("name") =>
            {
                // New account: the server wants a handle with the code.
                self.set(
                    AuthState::OtpName {
                        method,
                        target,
                        code,
                    },
                    None,
                );
                Ok(())
            }
            Err(err) => {
                // Bad code: back to the verify screen.
                self.set(
                    AuthState::OtpVerify { method, target },
                    Some(err.message.clone()),
                );
                Err(err)
            }
        }
    }

    /// The OAuth popup posted a finished session back (broadcast channel or
    /// postMessage; both converge here).
    pub fn complete_oauth(&self, response: AuthResponse) -> Result<()> {
        let snapshot = self.snapshot();
        if !matches!(snapshot.state, AuthState::OauthPending { .. }) {
            return Err(Error::validation("no OAuth flow in progress"));
        }
        self.complete_session(response);
        Ok(())
    }

    /// The popup closed without a message: back to the method list.
    pub fn oauth_cancelled(&self) {
        let snapshot = self.snapshot();
        if matches!(snapshot.state, AuthState::OauthPending { .. }) {
            self.set(self.methods_or_idle(), None);
        }
    }

    /// web3-pending: fetch the challenge, have the external signer sign it,
    /// submit for verification.
    pub async fn login_web3(&self, signer: &dyn WalletSigner) -> Result<()> {
        let snapshot = self.snapshot();
        if !matches!(snapshot.state, AuthState::Web3Pending { .. }) {
            return Err(Error::validation("no wallet flow in progress"));
        }

        let address = signer.address();
        let nonce = match self.api.ethereum_nonce(&address).await {
            Ok(nonce) => nonce,
            Err(err) => {
                self.set(self.methods_or_idle(), Some(err.message.clone()));
                return Err(err);
            }
        };

        let signature = match signer.sign(&nonce.message).await {
            Ok(signature) => signature,
            Err(reason) => {
                self.set(self.methods_or_idle(), Some(reason.clone()));
                return Err(Error::new(ErrorKind::Unknown, reason));
            }
        };

        match self
            .api
            .ethereum_verify(&Web3VerifyRequest {
                address,
                message: nonce.message,
                signature,
            })
            .await
        {
            Ok(response) => {
                self.complete_session(response);
                Ok(())
            }
            Err(err) => {
                self.set(self.methods_or_idle(), Some(err.message.clone()));
                Err(err)
            }
        }
    }

    /// Debounced availability query while the user types. Returns `None`
    /// when a newer keystroke superseded this one.
    pub async fn check_username(&self, name: &str) -> Result<Option<CheckUsernameResponse>> {
        let generation = self
            .username_check_generation
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        tokio::time::sleep(USERNAME_CHECK_DEBOUNCE).await;
        if self.username_check_generation.load(Ordering::SeqCst) != generation {
            return Ok(None);
        }
        self.api.check_username(name).await.map(Some)
    }

    /// username-required → authenticated. Uniqueness is server-enforced.
    pub async fn set_username(&self, name: &str) -> Result<()> {
        let snapshot = self.snapshot();
        let AuthState::UsernameRequired { session } = snapshot.state else {
            return Err(Error::validation("no username pending"));
        };

        match self
            .api
            .update_me(&UpdateMeRequest {
                name: Some(name.to_string()),
                ..Default::default()
            })
            .await
        {
            Ok(me) => {
                let session = Session {
                    user: me.user,
                    ..session
                };
                save_session(self.storage.as_ref(), &session);
                self.bus.publish_login(session.clone());
                self.set(AuthState::Authenticated { session }, None);
                Ok(())
            }
            Err(err) => {
                self.set(
                    AuthState::UsernameRequired { session },
                    Some(err.message.clone()),
                );
                Err(err)
            }
        }
    }

    /// Escape hatch from any in-flow state; never deadlocks.
    pub fn cancel(&self) {
        let snapshot = self.snapshot();
        match snapshot.state {
            AuthState::Authenticated { .. } | AuthState::UsernameRequired { .. } => {}
            _ => self.set(self.methods_or_idle(), None),
        }
    }

    /// Drop the session everywhere: server side (best effort), storage,
    /// token slot, sibling tabs.
    pub async fn logout(&self) {
        if let Err(err) = self.api.logout().await {
            tracing::debug!(%err, "server logout failed, clearing locally");
        }
        clear_session(self.storage.as_ref());
        self.token.clear();
        self.set(AuthState::Idle, None);
        self.bus.publish_logout();
    }

    /// Exchange the refresh token for a fresh session. Invalidation logs the
    /// viewer out locally.
    pub async fn refresh_session(&self) -> Result<()> {
        let Some(session) = self.session() else {
            return Err(Error::new(ErrorKind::Unauthorized, "no session"));
        };
        let Some(refresh_token) = session.refresh_token else {
            return Err(Error::new(ErrorKind::Unauthorized, "no refresh token"));
        };

        match self.api.refresh(&refresh_token).await {
            Ok(response) => {
                self.complete_session(response);
                Ok(())
            }
            Err(err) => {
                if err.kind == ErrorKind::Unauthorized {
                    tracing::info!("refresh token rejected, clearing session");
                    clear_session(self.storage.as_ref());
                    self.token.clear();
                    self.set(AuthState::Idle, None);
                    self.bus.publish_logout();
                }
                Err(err)
            }
        }
    }

    /// Re-fetch the user snapshot behind an existing session; retries once
    /// through the refresh flow on a stale token.
    pub async fn refresh_user(&self) -> Result<()> {
        let me = match self.api.me().await {
            Ok(me) => me,
            Err(err) if err.kind == ErrorKind::Unauthorized => {
                self.refresh_session().await?;
                self.api.me().await?
            }
            Err(err) => return Err(err),
        };

        if let Some(session) = self.session() {
            let session = Session {
                user: me.user,
                ..session
            };
            save_session(self.storage.as_ref(), &session);
            let next = if session.user.username_set {
                AuthState::Authenticated { session }
            } else {
                AuthState::UsernameRequired { session }
            };
            self.set(next, None);
        }
        Ok(())
    }

    // === Internal ===

    /// Terminal transition shared by every login flow.
    fn complete_session(&self, response: AuthResponse) {
        let session = Session {
            token: response.token,
            refresh_token: response.refresh_token,
            user: response.user,
        };
        self.token.set(&session.token);
        save_session(self.storage.as_ref(), &session);

        if session.user.username_set {
            self.bus.publish_login(session.clone());
            self.set(AuthState::Authenticated { session }, None);
        } else {
            self.set(AuthState::UsernameRequired { session }, None);
        }
    }

    /// A sibling tab logged in; reconcile without re-publishing.
    fn adopt_login(&self, session: Session) {
        if let Some(current) = self.session() {
            if current.token == session.token {
                return;
            }
        }
        self.token.set(&session.token);
        self.set(AuthState::Authenticated { session }, None);
    }

    /// A sibling tab logged out.
    fn adopt_logout(&self) {
        if self.session().is_none() {
            return;
        }
        self.token.clear();
        self.set(AuthState::Idle, None);
    }
}
