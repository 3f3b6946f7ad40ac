use super::client::*;
use crate::session::dto::{
    AlphaDetailResponse, CheckResponse, DataFieldResponse, IsMetrics, PagedResponse,
    SimulationRequest, SimulationResponse,
};
use crate::session::urls::last_path_segment;
use crate::session::WQBSession;
use crate::simulate::model::{AlphaType, JobCandidate, SimulationSettings};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Response;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// 基于 WQBSession 的远程客户端
pub struct WqbClient {
    session: Arc<WQBSession>,
}

impl WqbClient {
    pub fn new(session: Arc<WQBSession>) -> Self {
        Self { session }
    }
}

/// 非 2xx 转成 CallError，2xx 原样返回
async fn ensure_success(resp: Response) -> Result<Response, CallError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(CallError::from_status(status.as_u16(), body))
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get("Retry-After")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn metrics_from_is(is: Option<&IsMetrics>) -> AlphaMetrics {
    let Some(is) = is else {
        return AlphaMetrics::default();
    };
    AlphaMetrics {
        sharpe: is.sharpe,
        fitness: is.fitness,
        turnover: is.turnover,
        drawdown: is.drawdown,
        long_count: is.long_count,
        short_count: is.short_count,
        returns: is.returns,
        margin: is.margin,
        pnl: is.pnl,
        ..AlphaMetrics::default()
    }
}

pub(crate) fn record_from_detail(detail: AlphaDetailResponse) -> AlphaRecord {
    let expression = detail.expression().unwrap_or_default();
    AlphaRecord {
        alpha_type: detail
            .alpha_type
            .as_deref()
            .and_then(AlphaType::parse)
            .unwrap_or_default(),
        expression,
        metrics: metrics_from_is(detail.is.as_ref()),
        settings: detail.settings.unwrap_or_else(SimulationSettings::empty),
        platform_status: detail.status,
        date_created: detail.date_created,
        alpha_id: detail.id,
    }
}

fn field_from_dto(dto: DataFieldResponse, scope: &FieldScope) -> FieldRecord {
    let named = |r: &Option<crate::session::dto::NamedRef>| {
        let r = r.as_ref();
        (
            r.and_then(|x| x.id.clone()).unwrap_or_default(),
            r.and_then(|x| x.name.clone()).unwrap_or_default(),
        )
    };
    let (dataset_id, dataset_name) = named(&dto.dataset);
    let (category_id, category_name) = named(&dto.category);
    let (subcategory_id, subcategory_name) = named(&dto.subcategory);
    FieldRecord {
        field_id: dto.id,
        description: dto.description.unwrap_or_default(),
        dataset_id,
        dataset_name,
        category_id,
        category_name,
        subcategory_id,
        subcategory_name,
        region: dto.region.unwrap_or_else(|| scope.region.clone()),
        universe: dto.universe.unwrap_or_else(|| scope.universe.clone()),
        delay: dto.delay.unwrap_or(scope.delay),
        field_type: dto.field_type.unwrap_or_default(),
        coverage: dto.coverage.unwrap_or(0.0),
        user_count: dto.user_count.unwrap_or(0),
        alpha_count: dto.alpha_count.unwrap_or(0),
    }
}

/// 解析模拟进度响应体
///
/// 进行中时平台返回 Retry-After 与 {"progress": ...}，完成后返回带 status 的完整对象。
pub(crate) fn parse_progress(body: &str, retry_after: Option<Duration>) -> Result<Progress, CallError> {
    if body.trim().is_empty() {
        return Ok(Progress::Running {
            progress: None,
            retry_after,
        });
    }
    let val: Value = serde_json::from_str(body)
        .map_err(|e| CallError::Decode(format!("{}, 原始报文: {}", e, body)))?;
    if val.get("status").is_none() {
        return Ok(Progress::Running {
            progress: val.get("progress").and_then(|p| p.as_f64()),
            retry_after,
        });
    }
    let sim: SimulationResponse = serde_json::from_value(val)
        .map_err(|e| CallError::Decode(format!("{}, 原始报文: {}", e, body)))?;
    Ok(Progress::Finished(SimulationOutcome {
        status: sim.status.unwrap_or_default(),
        alpha_id: sim.alpha,
        message: sim.message,
    }))
}

/// 解析检查结果；空响应体或没有 checks 表示尚未就绪
pub(crate) fn parse_check(body: &str) -> Result<CheckReply, CallError> {
    if body.trim().is_empty() {
        return Ok(CheckReply::not_ready());
    }
    let resp: CheckResponse = serde_json::from_str(body)
        .map_err(|e| CallError::Decode(format!("{}, 原始报文: {}", e, body)))?;
    let checks: Vec<CheckItem> = resp
        .is
        .map(|is| is.checks)
        .unwrap_or_default()
        .into_iter()
        .map(|c| CheckItem {
            name: c.name,
            result: c.result.unwrap_or_default(),
            value: c.value.as_ref().and_then(|v| v.as_f64()),
        })
        .collect();
    Ok(CheckReply {
        ready: !checks.is_empty(),
        checks,
    })
}

#[async_trait]
impl RemoteJobClient for WqbClient {
    async fn submit(&self, candidate: &JobCandidate) -> Result<SubmitAccepted, CallError> {
        let req = SimulationRequest {
            alpha_type: candidate.alpha_type.as_str(),
            settings: &candidate.settings,
            regular: &candidate.expression,
        };
        let resp = ensure_success(self.session.post_simulation(&req).await?).await?;

        // 201 通常不带 body，ID 在 Location 头中
        let location_id = resp
            .headers()
            .get("Location")
            .and_then(|l| l.to_str().ok())
            .and_then(last_path_segment);
        let body = resp.text().await.unwrap_or_default();
        let body_id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(|s| s.to_string()));

        let progress_id = location_id
            .or(body_id)
            .ok_or_else(|| CallError::Decode("提交成功但无法获取 Simulation ID".to_string()))?;
        info!("▶ 模拟任务已提交: {}", progress_id);
        Ok(SubmitAccepted { progress_id })
    }

    async fn poll_progress(&self, handle: &SubmitAccepted) -> Result<Progress, CallError> {
        let resp =
            ensure_success(self.session.simulation_progress(&handle.progress_id).await?).await?;
        let wait = retry_after(&resp);
        let body = resp.text().await?;
        debug!("poll [{}] retry_after={:?}", handle.progress_id, wait);
        parse_progress(&body, wait)
    }

    async fn fetch_result(&self, alpha_id: &str) -> Result<AlphaRecord, CallError> {
        let resp = ensure_success(self.session.locate_alpha(alpha_id).await?).await?;
        let detail: AlphaDetailResponse = resp.json().await?;
        Ok(record_from_detail(detail))
    }

    async fn run_check(&self, alpha_id: &str) -> Result<CheckReply, CallError> {
        let resp = ensure_success(self.session.check_alpha(alpha_id).await?).await?;
        if retry_after(&resp).is_some() {
            return Ok(CheckReply::not_ready());
        }
        let body = resp.text().await?;
        parse_check(&body)
    }

    async fn submit_final(&self, alpha_id: &str) -> Result<(), CallError> {
        ensure_success(self.session.submit_alpha(alpha_id).await?).await?;
        Ok(())
    }

    async fn list_candidates(
        &self,
        filter: &CandidateFilter,
        page: Pagination,
    ) -> Result<Page<AlphaRecord>, CallError> {
        let resp = ensure_success(
            self.session
                .filter_alphas_limited(&filter.to_query(), page.limit, page.offset)
                .await?,
        )
        .await?;
        let paged: PagedResponse<AlphaDetailResponse> = resp.json().await?;
        Ok(Page {
            count: paged.count,
            results: paged.results.into_iter().map(record_from_detail).collect(),
        })
    }

    async fn list_field_catalog(
        &self,
        scope: &FieldScope,
        page: Pagination,
    ) -> Result<Page<FieldRecord>, CallError> {
        let resp = ensure_success(
            self.session
                .search_fields_limited(&scope.to_query(), page.limit, page.offset)
                .await?,
        )
        .await?;
        let paged: PagedResponse<DataFieldResponse> = resp.json().await?;
        Ok(Page {
            count: paged.count,
            results: paged
                .results
                .into_iter()
                .map(|d| field_from_dto(d, scope))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_only_body_is_running() {
        let p = parse_progress(r#"{"progress": 0.4}"#, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(
            p,
            Progress::Running {
                progress: Some(0.4),
                retry_after: Some(Duration::from_secs(5))
            }
        );
        assert!(matches!(parse_progress("  ", None).unwrap(), Progress::Running { .. }));
    }

    #[test]
    fn finished_body_carries_status_and_alpha() {
        let p = parse_progress(r#"{"id":"s1","status":"COMPLETE","alpha":"A1"}"#, None).unwrap();
        let Progress::Finished(out) = p else {
            panic!("expected finished");
        };
        assert_eq!(out.status, "COMPLETE");
        assert_eq!(out.alpha_id.as_deref(), Some("A1"));
    }

    #[test]
    fn empty_check_body_is_not_ready() {
        assert!(!parse_check("").unwrap().ready);
        assert!(!parse_check(r#"{"is": {"checks": []}}"#).unwrap().ready);
    }

    #[test]
    fn check_values_are_extracted() {
        let reply = parse_check(
            r#"{"is": {"checks": [
                {"name": "LOW_SHARPE", "result": "PASS", "limit": 1.25, "value": 1.61},
                {"name": "SELF_CORRELATION", "result": "PENDING"}
            ]}}"#,
        )
        .unwrap();
        assert!(reply.ready);
        assert_eq!(reply.value_of("LOW_SHARPE"), Some(1.61));
        assert_eq!(reply.value_of("SELF_CORRELATION"), None);
    }

    #[test]
    fn detail_maps_to_record() {
        let detail: AlphaDetailResponse = serde_json::from_str(
            r#"{"id":"A9","type":"REGULAR","status":"UNSUBMITTED",
                "settings":{"region":"USA","universe":"TOP3000"},
                "regular":{"code":"rank(close)"},
                "is":{"sharpe":1.4,"fitness":0.9,"drawdown":0.1}}"#,
        )
        .unwrap();
        let rec = record_from_detail(detail);
        assert_eq!(rec.alpha_id, "A9");
        assert_eq!(rec.expression, "rank(close)");
        assert_eq!(rec.metrics.sharpe, Some(1.4));
        assert_eq!(rec.settings.universe.as_deref(), Some("TOP3000"));
        assert_eq!(rec.platform_status.as_deref(), Some("UNSUBMITTED"));
    }
}
