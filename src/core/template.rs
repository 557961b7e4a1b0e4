//! 消息模板
//!
//! 模板由文本片段和命名属性占位符组成，例如
//! `"User {UserId} logged in after {Elapsed:F2} ms"`。
//! 渲染时用事件的属性包替换占位符，格式说明符交给 [`FormatProvider`] 处理。

use chrono::format::{Item, StrftimeItems};
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::event::{PropertyValue, ScalarValue};

/// 文化相关的格式化扩展点
///
/// 返回 `None` 表示使用不变文化的默认渲染。
pub trait FormatProvider: Send + Sync + fmt::Debug {
    fn format_scalar(&self, value: &ScalarValue, format: Option<&str>) -> Option<String> {
        let _ = (value, format);
        None
    }
}

/// 不变文化格式化
#[derive(Debug, Clone, Copy, Default)]
pub struct InvariantFormatProvider;

impl FormatProvider for InvariantFormatProvider {}

/// 占位符的捕获提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destructuring {
    #[default]
    Default,
    /// `{@Name}`
    Destructure,
    /// `{$Name}`
    Stringify,
}

/// 对齐方式，宽度为正数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left(usize),
    Right(usize),
}

/// 命名属性占位符
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyToken {
    name: String,
    raw_text: String,
    format: Option<String>,
    alignment: Option<Alignment>,
    destructuring: Destructuring,
}

impl PropertyToken {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 占位符在模板中的原始文本（含花括号）
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    pub fn alignment(&self) -> Option<Alignment> {
        self.alignment
    }

    pub fn destructuring(&self) -> Destructuring {
        self.destructuring
    }

    /// 使用属性包渲染此占位符；缺失的属性输出原始文本
    pub fn render(
        &self,
        properties: &BTreeMap<String, PropertyValue>,
        provider: &dyn FormatProvider,
        output: &mut String,
    ) {
        let Some(value) = properties.get(&self.name) else {
            output.push_str(&self.raw_text);
            return;
        };

        let mut rendered = String::new();
        render_value(value, self.format.as_deref(), provider, &mut rendered);

        match self.alignment {
            None => output.push_str(&rendered),
            Some(alignment) => pad(&rendered, alignment, output),
        }
    }
}

/// 模板片段
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateToken {
    Text(String),
    Property(PropertyToken),
}

/// 解析后的消息模板
#[derive(Debug, Clone, PartialEq)]
pub struct MessageTemplate {
    text: String,
    tokens: Vec<TemplateToken>,
}

impl MessageTemplate {
    /// 解析模板文本。无效的占位符按普通文本处理，解析永不失败。
    pub fn parse(text: &str) -> Self {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(c) = rest.chars().next() {
            match c {
                '{' if rest.starts_with("{{") => {
                    literal.push('{');
                    rest = &rest[2..];
                }
                '}' if rest.starts_with("}}") => {
                    literal.push('}');
                    rest = &rest[2..];
                }
                '{' => match rest.find('}') {
                    Some(end) => {
                        let raw = &rest[..=end];
                        match parse_property(raw) {
                            Some(token) => {
                                if !literal.is_empty() {
                                    tokens.push(TemplateToken::Text(std::mem::take(&mut literal)));
                                }
                                tokens.push(TemplateToken::Property(token));
                            }
                            None => literal.push_str(raw),
                        }
                        rest = &rest[end + 1..];
                    }
                    None => {
                        literal.push_str(rest);
                        rest = "";
                    }
                },
                _ => {
                    literal.push(c);
                    rest = &rest[c.len_utf8()..];
                }
            }
        }

        if !literal.is_empty() {
            tokens.push(TemplateToken::Text(literal));
        }

        Self {
            text: text.to_string(),
            tokens,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[TemplateToken] {
        &self.tokens
    }

    pub fn property_tokens(&self) -> impl Iterator<Item = &PropertyToken> {
        self.tokens.iter().filter_map(|token| match token {
            TemplateToken::Property(property) => Some(property),
            TemplateToken::Text(_) => None,
        })
    }

    pub fn render(
        &self,
        properties: &BTreeMap<String, PropertyValue>,
        provider: &dyn FormatProvider,
    ) -> String {
        let mut output = String::with_capacity(self.text.len());
        for token in &self.tokens {
            match token {
                TemplateToken::Text(text) => output.push_str(text),
                TemplateToken::Property(property) => {
                    property.render(properties, provider, &mut output)
                }
            }
        }
        output
    }
}

impl fmt::Display for MessageTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn parse_property(raw: &str) -> Option<PropertyToken> {
    let inner = &raw[1..raw.len() - 1];
    let (head, format) = match inner.split_once(':') {
        Some((head, format)) if !format.is_empty() => (head, Some(format.to_string())),
        Some(_) => return None,
        None => (inner, None),
    };
    let (name_part, alignment) = match head.split_once(',') {
        Some((name, alignment)) => (name, Some(parse_alignment(alignment)?)),
        None => (head, None),
    };

    let (destructuring, name) = match name_part.chars().next() {
        Some('@') => (Destructuring::Destructure, &name_part[1..]),
        Some('$') => (Destructuring::Stringify, &name_part[1..]),
        _ => (Destructuring::Default, name_part),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    Some(PropertyToken {
        name: name.to_string(),
        raw_text: raw.to_string(),
        format,
        alignment,
        destructuring,
    })
}

fn parse_alignment(text: &str) -> Option<Alignment> {
    let (left, digits) = match text.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, text),
    };
    let width: usize = digits.parse().ok()?;
    if width == 0 {
        return None;
    }
    Some(if left {
        Alignment::Left(width)
    } else {
        Alignment::Right(width)
    })
}

fn pad(text: &str, alignment: Alignment, output: &mut String) {
    let len = text.chars().count();
    match alignment {
        Alignment::Left(width) => {
            let width = width.min(MAX_ALIGNMENT_WIDTH);
            output.push_str(text);
            output.extend(std::iter::repeat(' ').take(width.saturating_sub(len)));
        }
        Alignment::Right(width) => {
            let width = width.min(MAX_ALIGNMENT_WIDTH);
            output.extend(std::iter::repeat(' ').take(width.saturating_sub(len)));
            output.push_str(text);
        }
    }
}

/// 以人类可读的形式渲染属性值
pub(crate) fn render_value(
    value: &PropertyValue,
    format: Option<&str>,
    provider: &dyn FormatProvider,
    output: &mut String,
) {
    match value {
        PropertyValue::Scalar(scalar) => render_scalar(scalar, format, provider, output),
        PropertyValue::Sequence(elements) => {
            output.push('[');
            for (i, element) in elements.iter().enumerate() {
                if i > 0 {
                    output.push_str(", ");
                }
                render_value(element, format, provider, output);
            }
            output.push(']');
        }
        PropertyValue::Structure(structure) => {
            if let Some(tag) = &structure.type_tag {
                output.push_str(tag);
                output.push(' ');
            }
            output.push_str("{ ");
            for (i, (name, field)) in structure.fields.iter().enumerate() {
                if i > 0 {
                    output.push_str(", ");
                }
                output.push_str(name);
                output.push_str(": ");
                render_value(field, None, provider, output);
            }
            output.push_str(" }");
        }
        PropertyValue::Dictionary(entries) => {
            output.push('[');
            for (i, (key, entry)) in entries.iter().enumerate() {
                if i > 0 {
                    output.push_str(", ");
                }
                output.push('(');
                render_scalar(key, None, provider, output);
                output.push_str(": ");
                render_value(entry, None, provider, output);
                output.push(')');
            }
            output.push(']');
        }
    }
}

fn render_scalar(
    scalar: &ScalarValue,
    format: Option<&str>,
    provider: &dyn FormatProvider,
    output: &mut String,
) {
    match scalar {
        ScalarValue::Null => output.push_str("null"),
        ScalarValue::String(s) if format == Some("l") => output.push_str(s),
        ScalarValue::String(s) => {
            output.push('"');
            output.push_str(&s.replace('"', "\\\""));
            output.push('"');
        }
        other => match provider.format_scalar(other, format) {
            Some(text) => output.push_str(&text),
            None => output.push_str(&format_invariant(other, format)),
        },
    }
}

/// 不变文化下的标量格式化
///
/// 数值支持 `F<n>`、`N<n>`、`D<n>`、`X<n>`/`x<n>` 与 `0.00` 形式；
/// 时间支持 `o`、`s`、`u` 以及 chrono 的 `%` 格式。无法识别的格式退回自然形式。
pub fn format_invariant(value: &ScalarValue, format: Option<&str>) -> String {
    match value {
        ScalarValue::Null => "null".to_string(),
        ScalarValue::Bool(b) => b.to_string(),
        ScalarValue::Char(c) => c.to_string(),
        ScalarValue::String(s) => s.clone(),
        ScalarValue::I64(v) => format
            .and_then(|f| format_integer(*v as i128, f))
            .unwrap_or_else(|| v.to_string()),
        ScalarValue::U64(v) => format
            .and_then(|f| format_integer(*v as i128, f))
            .unwrap_or_else(|| v.to_string()),
        ScalarValue::F64(v) => format
            .filter(|_| v.is_finite())
            .and_then(|f| format_float(*v, f))
            .unwrap_or_else(|| natural_float(*v)),
        ScalarValue::DateTime(dt) => match format {
            Some("o") | Some("O") => format!(
                "{}.{:07}{}",
                dt.format("%Y-%m-%dT%H:%M:%S"),
                dt.timestamp_subsec_nanos() / 100,
                dt.format("%:z")
            ),
            Some("s") => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            Some("u") => dt
                .with_timezone(&Utc)
                .format("%Y-%m-%d %H:%M:%SZ")
                .to_string(),
            Some(pattern) if is_valid_strftime(pattern) => dt.format(pattern).to_string(),
            _ => dt.to_rfc3339_opts(SecondsFormat::AutoSi, false),
        },
    }
}

pub(crate) fn natural_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        let text = if v > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else {
        v.to_string()
    }
}

fn is_valid_strftime(pattern: &str) -> bool {
    pattern.contains('%') && !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
}

/// 数值格式中精度或位宽的上限，超出时退回自然形式
const MAX_FORMAT_PRECISION: usize = 99;

/// 对齐宽度的上限
const MAX_ALIGNMENT_WIDTH: usize = 1024;

fn split_format(format: &str) -> Option<(char, Option<usize>)> {
    let mut chars = format.chars();
    let kind = chars.next()?;
    let precision = chars.as_str();
    if precision.is_empty() {
        return Some((kind, None));
    }
    precision
        .parse()
        .ok()
        .filter(|p| *p <= MAX_FORMAT_PRECISION)
        .map(|p| (kind, Some(p)))
}

/// Digits after the decimal point of a `0.00`/`#.##` style pattern.
fn custom_decimals(format: &str) -> Option<usize> {
    if format.is_empty() || !format.chars().all(|c| matches!(c, '0' | '#' | '.' | ',')) {
        return None;
    }
    let decimals = format.split_once('.').map_or(0, |(_, frac)| frac.len());
    (decimals <= MAX_FORMAT_PRECISION).then_some(decimals)
}

fn format_integer(v: i128, format: &str) -> Option<String> {
    if let Some(decimals) = custom_decimals(format) {
        return format_float(v as f64, &format!("F{}", decimals));
    }
    let (kind, precision) = split_format(format)?;
    let width = precision.unwrap_or(0);
    match kind {
        'D' | 'd' => {
            let digits = format!("{:0width$}", v.unsigned_abs(), width = width);
            Some(if v < 0 { format!("-{}", digits) } else { digits })
        }
        'X' => Some(format!("{:0width$X}", v as i64, width = width)),
        'x' => Some(format!("{:0width$x}", v as i64, width = width)),
        'F' | 'f' | 'N' | 'n' => format_float(v as f64, format),
        _ => None,
    }
}

fn format_float(v: f64, format: &str) -> Option<String> {
    if let Some(decimals) = custom_decimals(format) {
        return Some(format!("{:.*}", decimals, v));
    }
    let (kind, precision) = split_format(format)?;
    let decimals = precision.unwrap_or(2);
    match kind {
        'F' | 'f' => Some(format!("{:.*}", decimals, v)),
        'N' | 'n' => Some(group_thousands(&format!("{:.*}", decimals, v))),
        _ => None,
    }
}

fn group_thousands(fixed: &str) -> String {
    let (sign, unsigned) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac)) => (int_part, Some(frac)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match frac_part {
        Some(frac) => format!("{}{}.{}", sign, grouped, frac),
        None => format!("{}{}", sign, grouped),
    }
}
