use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// 登录请求的描述
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub url: String,
    pub authorization: String,
    pub expected: StatusCode,
    pub max_tries: usize,
    pub retry_delay: Duration,
}

/// 带 cookie store 的 HTTP 客户端
///
/// 登录成功后平台下发的 cookie 被后续请求复用；续期时机由 `SessionManager` 决定。
pub struct CookieClient {
    client: Client,
    login: LoginRequest,
}

impl CookieClient {
    pub fn new(login: LoginRequest, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .user_agent(concat!("alphamill/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, login })
    }

    /// 发送登录请求；状态码不符合预期时按设置重试，返回最后一次响应
    pub async fn login(&self) -> Result<Response, reqwest::Error> {
        let tries = self.login.max_tries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let resp = self
                .client
                .post(&self.login.url)
                .header(reqwest::header::AUTHORIZATION, &self.login.authorization)
                .send()
                .await?;
            if resp.status() == self.login.expected || attempt >= tries {
                debug!("登录请求第 {} 次: {}", attempt, resp.status());
                return Ok(resp);
            }
            warn!("⚠ 登录返回 {}，{:?} 后重试", resp.status(), self.login.retry_delay);
            tokio::time::sleep(self.login.retry_delay).await;
        }
    }

    pub async fn send<F>(&self, build: F) -> Result<Response, reqwest::Error>
    where
        F: FnOnce(&Client) -> RequestBuilder,
    {
        build(&self.client).send().await
    }
}
