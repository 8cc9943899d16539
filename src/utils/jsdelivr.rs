//! Geo 数据源的 CDN 镜像
//!
//! GitHub 上的数据集可通过 jsDelivr 获取：
//! `https://raw.githubusercontent.com/<user>/<repo>/<ref>/<path>`
//! 与 `https://github.com/<user>/<repo>/raw/<ref>/<path>`
//! 都映射为 `https://cdn.jsdelivr.net/gh/<user>/<repo>@<ref>/<path>`。

use once_cell::sync::Lazy;
use regex::Regex;

static GITHUB_RAW: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"^https?://(?:raw\.githubusercontent\.com/([^/]+)/([^/]+)|github\.com/([^/]+)/([^/]+)/raw)/([^/]+)/(.+)$",
    )
    .ok()
});

/// 返回数据源的 jsDelivr 镜像地址；非 GitHub 资源返回 None
pub fn jsdelivr_mirror(url: &str) -> Option<String> {
    let caps = GITHUB_RAW.as_ref()?.captures(url)?;
    let user = caps.get(1).or_else(|| caps.get(3))?.as_str();
    let repo = caps.get(2).or_else(|| caps.get(4))?.as_str();
    let git_ref = caps.get(5)?.as_str();
    let path = caps.get(6)?.as_str();

    Some(format!(
        "https://cdn.jsdelivr.net/gh/{}/{}@{}/{}",
        user, repo, git_ref, path
    ))
}

/// 按设置决定实际下载地址
pub fn resolve_source_url(url: &str, use_mirror: bool) -> String {
    if use_mirror {
        if let Some(mirrored) = jsdelivr_mirror(url) {
            return mirrored;
        }
        log::debug!("No CDN mirror for {}, using it directly", url);
    }
    url.to_string()
}
