use crate::config::VcenterEnv;
use crate::prelude::{Error, Result, VimError};
use crate::vim::Vim;
use crate::vim::types::{MoRef, ServiceContent, TaskInfo};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, Method, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{OnceCell, RwLock};

/// Header carrying the session token of an authenticated connection.
///
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// Concrete implementation of the `Vim` trait over the vSphere JSON API
/// using the `reqwest` crate.
///
/// Managed objects are addressed as `/{type}/{id}`; properties are read with
/// `GET /{type}/{id}/{property}` and methods invoked with
/// `POST /{type}/{id}/{method}` and a JSON object of named arguments.
///
pub struct VimClient {
    client: OnceCell<Client>,
    url: String,
    username: String,
    password: SecretString,
    accept_invalid_certs: bool,
    session: RwLock<Option<SecretString>>,
}

impl VimClient {
    /// Creates a new, not yet authenticated, instance of the client.
    ///
    /// # Arguments
    ///
    /// * `url`: Base URL of the vCenter server, e.g. `https://vc.example.com`.
    /// * `release`: API release to speak, e.g. `8.0.2.0`.
    /// * `username`: Login user.
    /// * `password`: Login password.
    ///
    pub fn new(url: &str, release: &str, username: &str, password: SecretString) -> Self {
        Self {
            client: OnceCell::new(),
            url: format!("{}/sdk/vim25/{}", url.trim_end_matches('/'), release),
            username: username.to_owned(),
            password,
            accept_invalid_certs: false,
            session: RwLock::new(None),
        }
    }

    /// Creates a client from the `vcenter` configuration section.
    ///
    pub fn from_env(env: &VcenterEnv) -> Self {
        let mut client = Self::new(&env.url, &env.release, &env.username, env.password.clone());
        client.accept_invalid_certs = env.accept_invalid_certs;
        client
    }

    /// Lazily initializes and returns a reference to the `reqwest::Client`.
    ///
    async fn get_client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                let mut headers = HeaderMap::new();
                headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

                Client::builder()
                    .default_headers(headers)
                    .danger_accept_invalid_certs(self.accept_invalid_certs)
                    .use_rustls_tls()
                    .build()
                    .map_err(Error::from)
            })
            .await
    }

    /// Sends a request to the API and checks the response status.
    ///
    /// The session token, when there is one, is attached as a sensitive
    /// header.
    ///
    /// # Arguments
    ///
    /// * `method`: HTTP method to use for the request.
    /// * `path`: Path below the versioned API root.
    /// * `body`: Optional JSON body.
    /// * `error_var`: Specific error to use if the API call fails.
    ///
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        error_var: VimError,
    ) -> Result<Response> {
        let client = self.get_client().await?;
        let url = format!("{}{}", self.url, path);

        let mut request = client.request(method, &url);
        if let Some(token) = self.session.read().await.as_ref() {
            let mut header = HeaderValue::from_str(token.expose_secret())?;
            header.set_sensitive(true);
            request = request.header(SESSION_HEADER, header);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        match response.status() {
            status if status.is_success() => Ok(response),
            status => {
                let text = response.text().await?;
                tracing::debug!(target: "vim", %status, %path, body = %text, "Request rejected");
                Err(Error::Vim(error_var, status, text))
            }
        }
    }

    /// Generic helper to perform a request and deserialize its body.
    ///
    /// An empty body (void methods) deserializes from `null`.
    ///
    /// # Types
    ///
    /// * `D`: Type of the response data, which must be deserializable.
    ///
    async fn make_request<D>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        error_var: VimError,
    ) -> Result<D>
    where
        D: DeserializeOwned,
    {
        let bytes = self.send(method, path, body, error_var).await?.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn object_path(object: &MoRef, member: &str) -> String {
        format!("/{}/{}/{}", object.kind, object.encoded_value(), member)
    }

    async fn session_manager(&self) -> Result<MoRef> {
        Ok(self
            .content()
            .await?
            .session_manager
            .unwrap_or_else(|| MoRef::new("SessionManager", "SessionManager")))
    }
}

#[async_trait]
impl Vim for VimClient {
    async fn login(&self) -> Result<()> {
        let session_manager = self.session_manager().await?;
        let path = Self::object_path(&session_manager, "Login");
        let credentials = json!({
            "userName": self.username,
            "password": self.password.expose_secret(),
        });

        let response = self
            .send(Method::POST, &path, Some(&credentials), VimError::Login)
            .await?;
        let status = response.status();
        let token = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| SecretString::from(value.to_owned()))
            .ok_or_else(|| {
                Error::Vim(VimError::Login, status, format!("missing {SESSION_HEADER} header"))
            })?;

        *self.session.write().await = Some(token);
        tracing::info!(target: "vim", user = %self.username, "Logged in");
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let session_manager = self.session_manager().await?;
        let path = Self::object_path(&session_manager, "Logout");
        self.send(Method::POST, &path, None, VimError::Logout).await?;

        *self.session.write().await = None;
        tracing::info!(target: "vim", "Logged out");
        Ok(())
    }

    async fn content(&self) -> Result<ServiceContent> {
        let path = "/ServiceInstance/ServiceInstance/content";
        self.make_request(Method::GET, path, None, VimError::Content)
            .await
    }

    async fn invoke(&self, object: &MoRef, method: &str, args: Value) -> Result<Value> {
        let path = Self::object_path(object, method);
        let args = match args {
            Value::Null => json!({}),
            args => args,
        };
        tracing::trace!(target: "vim", %object, method, "Invoke");
        self.make_request(Method::POST, &path, Some(&args), VimError::Invoke)
            .await
    }

    async fn property(&self, object: &MoRef, name: &str) -> Result<Value> {
        let path = Self::object_path(object, name);
        self.make_request(Method::GET, &path, None, VimError::Property)
            .await
    }

    async fn task_info(&self, task: &MoRef) -> Result<TaskInfo> {
        let info = self.property(task, "info").await?;
        Ok(serde_json::from_value(info)?)
    }
}
