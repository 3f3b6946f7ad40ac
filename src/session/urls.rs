/// WorldQuant BRAIN API 基础 URL
pub const WQB_API_URL: &str = "https://api.worldquantbrain.com";

pub const URL_AUTHENTICATION: &str = "https://api.worldquantbrain.com/authentication";
pub const URL_SIMULATIONS: &str = "https://api.worldquantbrain.com/simulations";
pub const URL_DATAFIELDS: &str = "https://api.worldquantbrain.com/data-fields";
pub const URL_USERS_SELF_ALPHAS: &str = "https://api.worldquantbrain.com/users/self/alphas";

pub fn url_alphas_alphaid(alpha_id: &str) -> String {
    format!("{}/alphas/{}", WQB_API_URL, alpha_id)
}

pub fn url_alphas_alphaid_check(alpha_id: &str) -> String {
    format!("{}/check", url_alphas_alphaid(alpha_id))
}

pub fn url_alphas_alphaid_submit(alpha_id: &str) -> String {
    format!("{}/submit", url_alphas_alphaid(alpha_id))
}

pub fn url_simulations_id(progress_id: &str) -> String {
    format!("{}/{}", URL_SIMULATIONS, progress_id)
}

/// 从 Location 头（或完整 URL）中取最后一段作为 ID
pub fn last_path_segment(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
