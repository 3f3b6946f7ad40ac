use super::dto::SimulationRequest;
use super::http::{CookieClient, LoginRequest};
use super::manager::{AuthError, Authenticator};
use super::urls::*;
use async_trait::async_trait;
use base64::Engine;
use log::info;
use reqwest::{Response, StatusCode};
use std::time::Duration;

/// WorldQuant BRAIN 平台的会话
///
/// 每个方法只发一次请求，状态码的解释交给 `remote::WqbClient`。
pub struct WQBSession {
    session: CookieClient,
    email: String,
}

impl WQBSession {
    pub fn new(email: String, password: String) -> Result<Self, reqwest::Error> {
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", email, password));
        let login = LoginRequest {
            url: URL_AUTHENTICATION.to_string(),
            authorization: format!("Basic {}", credentials),
            expected: StatusCode::CREATED,
            max_tries: 3,
            retry_delay: Duration::from_secs(2),
        };
        let session = CookieClient::new(login, Duration::from_secs(30))?;
        Ok(Self { session, email })
    }

    /// 执行认证请求
    pub async fn auth_request(&self) -> Result<Response, reqwest::Error> {
        self.session.login().await
    }

    /// 提交模拟
    pub async fn post_simulation(
        &self,
        body: &SimulationRequest<'_>,
    ) -> Result<Response, reqwest::Error> {
        let resp = self
            .session
            .send(|client| client.post(URL_SIMULATIONS).json(body))
            .await?;
        info!("{} post_simulation(...) [{}]", self, URL_SIMULATIONS);
        Ok(resp)
    }

    /// 查询模拟进度
    pub async fn simulation_progress(&self, progress_id: &str) -> Result<Response, reqwest::Error> {
        let url = url_simulations_id(progress_id);
        self.session.send(|client| client.get(&url)).await
    }

    /// 定位 Alpha
    pub async fn locate_alpha(&self, alpha_id: &str) -> Result<Response, reqwest::Error> {
        let url = url_alphas_alphaid(alpha_id);
        let resp = self.session.send(|client| client.get(&url)).await?;
        info!("{} locate_alpha(...) [{}]", self, url);
        Ok(resp)
    }

    /// 检查 Alpha 提交状态
    pub async fn check_alpha(&self, alpha_id: &str) -> Result<Response, reqwest::Error> {
        let url = url_alphas_alphaid_check(alpha_id);
        let resp = self.session.send(|client| client.get(&url)).await?;
        info!("{} check_alpha(...) [{}]", self, url);
        Ok(resp)
    }

    /// 提交 Alpha
    pub async fn submit_alpha(&self, alpha_id: &str) -> Result<Response, reqwest::Error> {
        let url = url_alphas_alphaid_submit(alpha_id);
        let resp = self
            .session
            .send(|client| client.post(&url).json(&serde_json::json!({})))
            .await?;
        info!("{} submit_alpha(...) [{}]", self, url);
        Ok(resp)
    }

    /// 过滤自己的 Alpha（分页）
    pub async fn filter_alphas_limited(
        &self,
        params: &[(String, String)],
        limit: usize,
        offset: usize,
    ) -> Result<Response, reqwest::Error> {
        let limit = limit.clamp(1, 100);
        let mut query = params.to_vec();
        query.push(("limit".to_string(), limit.to_string()));
        query.push(("offset".to_string(), offset.to_string()));
        let resp = self
            .session
            .send(|client| client.get(URL_USERS_SELF_ALPHAS).query(&query))
            .await?;
        info!(
            "{} filter_alphas_limited(...) [{} offset={}]",
            self, URL_USERS_SELF_ALPHAS, offset
        );
        Ok(resp)
    }

    /// 搜索字段（分页）
    pub async fn search_fields_limited(
        &self,
        params: &[(String, String)],
        limit: usize,
        offset: usize,
    ) -> Result<Response, reqwest::Error> {
        let limit = limit.clamp(1, 50);
        let offset = offset.min(10000 - limit);
        let mut query = params.to_vec();
        query.push(("limit".to_string(), limit.to_string()));
        query.push(("offset".to_string(), offset.to_string()));
        let resp = self
            .session
            .send(|client| client.get(URL_DATAFIELDS).query(&query))
            .await?;
        info!(
            "{} search_fields_limited(...) [{} offset={}]",
            self, URL_DATAFIELDS, offset
        );
        Ok(resp)
    }
}

#[async_trait]
impl Authenticator for WQBSession {
    async fn authenticate(&self) -> Result<(), AuthError> {
        let resp = self
            .auth_request()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::CREATED {
            if let Ok(json) = resp.json::<serde_json::Value>().await {
                if let Some(user_id) = json.get("user").and_then(|u| u.get("id")) {
                    info!("✓ 认证成功, 用户 ID: {}", user_id);
                }
            }
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl std::fmt::Display for WQBSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<WQBSession [{}]>", self.email)
    }
}

impl std::fmt::Debug for WQBSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<WQBSession [{}]>", self.email)
    }
}
