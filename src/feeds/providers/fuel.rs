// src/feeds/providers/fuel.rs
//! Regional fuel prices scraped from the qiyoujiage province pages.

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::FetchError;
use crate::feeds::config::SourceConfig;
use crate::feeds::providers::{clean_text, first_number};
use crate::feeds::transport::FeedRequest;
use crate::feeds::types::{SourceAdapter, SourceKind};
use crate::fields::{FieldSet, FieldValue};

/// (Chinese name, page slug)
const PROVINCES: [(&str, &str); 34] = [
    ("北京", "beijing"),
    ("上海", "shanghai"),
    ("广东", "guangdong"),
    ("天津", "tianjin"),
    ("重庆", "chongqing"),
    ("河北", "hebei"),
    ("山西", "shanxi"),
    ("辽宁", "liaoning"),
    ("吉林", "jilin"),
    ("黑龙江", "heilongjiang"),
    ("江苏", "jiangsu"),
    ("浙江", "zhejiang"),
    ("安徽", "anhui"),
    ("福建", "fujian"),
    ("江西", "jiangxi"),
    ("山东", "shandong"),
    ("河南", "henan"),
    ("湖北", "hubei"),
    ("湖南", "hunan"),
    ("海南", "hainan"),
    ("四川", "sichuan"),
    ("贵州", "guizhou"),
    ("云南", "yunnan"),
    ("陕西", "shaanxi"),
    ("甘肃", "gansu"),
    ("青海", "qinghai"),
    ("台湾", "taiwan"),
    ("内蒙古", "neimenggu"),
    ("广西", "guangxi"),
    ("西藏", "xizang"),
    ("宁夏", "ningxia"),
    ("新疆", "xinjiang"),
    ("香港", "xianggang"),
    ("澳门", "aomen"),
];

const DEFAULT_PROVINCE: &str = "zhejiang";

/// Grades published per page, mapped to field names.
const GRADES: [(&str, &str); 4] = [
    ("92", "price_92"),
    ("95", "price_95"),
    ("98", "price_98"),
    ("0", "price_0"),
];

static RE_DL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<dl[^>]*>\s*<dt[^>]*>(.*?)</dt>\s*<dd[^>]*>(.*?)</dd>").expect("dl regex")
});
static RE_GRADE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*#").expect("grade regex"));
static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"));
static RE_DIV: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<div[^>]*>(.*?)</div>").expect("div regex"));
static RE_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<span[^>]*>(.*?)</span>").expect("span regex"));

/// Resolve a `province` filter given as slug or Chinese name.
pub fn province_slug(filter: &str) -> Option<&'static str> {
    let f = filter.trim();
    PROVINCES
        .iter()
        .find(|(name, slug)| *name == f || slug.eq_ignore_ascii_case(f))
        .map(|(_, slug)| *slug)
}

/// Direction of the next announced adjustment.
pub fn trend_direction(trend: &str) -> Option<&'static str> {
    if trend.contains("下调") {
        Some("down")
    } else if trend.contains("上调") {
        Some("up")
    } else if trend.contains("搁浅") || trend.contains("不作调整") {
        Some("flat")
    } else {
        None
    }
}

pub struct FuelAdapter;

#[async_trait]
impl SourceAdapter for FuelAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Fuel
    }

    fn validate(&self, config: &SourceConfig) -> Result<(), String> {
        match config.filter("province") {
            Some(p) if province_slug(p).is_none() => Err(format!("unknown province `{p}`")),
            _ => Ok(()),
        }
    }

    fn build_request(
        &self,
        config: &SourceConfig,
        _today: NaiveDate,
    ) -> Result<FeedRequest, FetchError> {
        let slug = config
            .filter("province")
            .and_then(province_slug)
            .unwrap_or(DEFAULT_PROVINCE);

        let mut url = config.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::network("fuel endpoint cannot carry a path"))?
            .pop_if_empty()
            .push(&format!("{slug}.shtml"));
        Ok(FeedRequest::get(url).with_header("Accept", "text/html"))
    }

    fn parse(&self, config: &SourceConfig, body: &str) -> Result<FieldSet, FetchError> {
        let mut fields = FieldSet::new();
        for (_, name) in GRADES {
            fields.set(name, FieldValue::Null);
        }

        let scope = section(body, "youjia").unwrap_or(body);
        let mut found = 0usize;
        for cap in RE_DL.captures_iter(scope) {
            let label = clean_text(&cap[1]);
            let Some(grade) = RE_GRADE.captures(&label).map(|g| g[1].to_string()) else {
                continue;
            };
            let Some((_, name)) = GRADES.iter().find(|(g, _)| *g == grade) else {
                continue;
            };
            if let Some(price) = first_number(&clean_text(&cap[2])) {
                fields.set(*name, price);
                found += 1;
            }
        }
        if found == 0 {
            return Err(FetchError::missing("price"));
        }

        // Prefer the province named in the page title, fall back to the request.
        let title = RE_TITLE
            .captures(body)
            .map(|c| clean_text(&c[1]))
            .unwrap_or_default();
        let province = PROVINCES
            .iter()
            .find(|(name, _)| title.contains(name))
            .map(|(_, slug)| *slug)
            .or_else(|| config.filter("province").and_then(province_slug))
            .unwrap_or(DEFAULT_PROVINCE);
        fields.set("province", province);

        let (next_adjustment, trend) = adjustment_notes(body);
        let direction = trend.as_deref().and_then(trend_direction);
        fields.set("next_adjustment", FieldValue::text_or_null(next_adjustment));
        fields.set("trend", FieldValue::text_or_null(trend));
        fields.set("trend_direction", FieldValue::text_or_null(direction));
        Ok(fields)
    }
}

/// HTML after the element with the given id, if present.
fn section<'a>(html: &'a str, id: &str) -> Option<&'a str> {
    let needle = format!("id=\"{id}\"");
    html.find(&needle).map(|i| &html[i + needle.len()..])
}

/// The second `<div>` under `#youjiaCont` holds "next adjustment" text with
/// the forecast sentence inside a `<span>`.
fn adjustment_notes(html: &str) -> (Option<String>, Option<String>) {
    let Some(cont) = section(html, "youjiaCont") else {
        return (None, None);
    };
    let Some(div) = RE_DIV.captures_iter(cont).nth(1) else {
        return (None, None);
    };
    let inner = div.get(1).map_or("", |m| m.as_str());

    let trend = RE_SPAN.captures(inner).map(|c| clean_text(&c[1]));
    let before_span = inner.split("<span").next().unwrap_or(inner);
    let info = clean_text(before_span);
    (
        Some(info).filter(|s| !s.is_empty()),
        trend.filter(|s| !s.is_empty()),
    )
}
