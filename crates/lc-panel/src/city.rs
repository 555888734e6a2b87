//! City-name normalisation.
//!
//! Sources spell the same prefecture differently: with or without `市`,
//! with a province prefix, with stray zero-width characters, or under a
//! pre-rename name. [`canonical`] gives the display form written to the
//! panel; [`match_key`] gives the join key used to line sources up.

use lc_core::Result;

use crate::table::{Column, Table};

/// Cities renamed during the sample period, old name to current name.
pub const RENAMES: &[(&str, &str)] = &[
    ("襄樊市", "襄阳市"),
    ("襄樊", "襄阳市"),
    ("思茅市", "普洱市"),
    ("思茅", "普洱市"),
    ("普洱市思茅区", "普洱市"),
];

/// Endings that already mark a complete administrative name.
const CANONICAL_SUFFIXES: &[&str] = &["市", "地区", "自治区", "自治州", "盟"];

/// Administrative suffixes removed by [`match_key`]; the longest match wins.
///
/// A bare `州` is never stripped: `杭州` keys as `杭州`.
const KEY_SUFFIXES: &[&str] = &[
    "土家族苗族自治州",
    "苗族侗族自治州",
    "哈萨克自治州",
    "蒙古自治州",
    "藏族自治州",
    "彝族自治州",
    "白族自治州",
    "傣族自治州",
    "壮族自治州",
    "侗族自治州",
    "朝鲜族自治州",
    "回族自治州",
    "维吾尔自治州",
    "自治州",
    "地区",
    "特区",
    "市",
    "盟",
];

const PROVINCES: &[&str] = &[
    "北京", "天津", "上海", "重庆", "河北", "山西", "内蒙古", "辽宁", "吉林", "黑龙江", "江苏", "浙江", "安徽",
    "福建", "江西", "山东", "河南", "湖北", "湖南", "广东", "广西", "海南", "四川", "贵州", "云南", "西藏",
    "陕西", "甘肃", "青海", "宁夏", "新疆", "香港", "澳门", "台湾",
];

const AUTONOMOUS_REGIONS: &[&str] =
    &["内蒙古自治区", "广西壮族自治区", "西藏自治区", "宁夏回族自治区", "新疆维吾尔自治区"];

/// Remove zero-width characters, turn non-breaking spaces into spaces, trim.
pub fn clean(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}'))
        .map(|c| if c == '\u{a0}' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Current name for a renamed city, after [`clean`].
pub fn rename(name: &str) -> String {
    let name = clean(name);
    RENAMES.iter().find(|(old, _)| *old == name).map(|(_, new)| new.to_string()).unwrap_or(name)
}

/// Display form: cleaned, renamed, and ending in `市` unless it already
/// carries an administrative suffix.
pub fn canonical(name: &str) -> String {
    let name = rename(name);
    if name.is_empty() || CANONICAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        name
    } else {
        format!("{}市", name)
    }
}

fn strip_suffix(name: &str) -> &str {
    // longest first
    let mut best: Option<&str> = None;
    for &s in KEY_SUFFIXES {
        if name.ends_with(s) && best.is_none_or(|b| s.len() > b.len()) {
            best = Some(s);
        }
    }
    match best {
        Some(s) if name.len() > s.len() => &name[..name.len() - s.len()],
        _ => name,
    }
}

fn strip_province(name: &str) -> &str {
    let full = AUTONOMOUS_REGIONS
        .iter()
        .map(|r| r.to_string())
        .chain(PROVINCES.iter().map(|p| format!("{}省", p)))
        .find(|p| name.starts_with(p.as_str()) && name.len() > p.len());
    if let Some(p) = full {
        return &name[p.len()..];
    }
    let short = PROVINCES
        .iter()
        .filter(|p| name.starts_with(**p) && name.len() > p.len())
        .max_by_key(|p| p.len());
    match short {
        Some(p) => &name[p.len()..],
        None => name,
    }
}

/// Join key: renamed, one administrative suffix stripped, then one province
/// prefix stripped when something is left (`吉林市` keys as `吉林`, while
/// `吉林省吉林市` also keys as `吉林`).
pub fn match_key(name: &str) -> String {
    let name = rename(name);
    strip_province(strip_suffix(&name)).to_string()
}

/// Rewrite a text column to [`canonical`] names; returns how many changed.
pub fn canonicalize_column(table: &mut Table, column: &str) -> Result<usize> {
    let names = table.text(column)?;
    let fixed: Vec<String> = names.iter().map(|n| canonical(n)).collect();
    let changed = names.iter().zip(&fixed).filter(|(a, b)| a != b).count();
    table.set(column, Column::Text(fixed))?;
    Ok(changed)
}
