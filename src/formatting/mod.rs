//! 事件与属性值的 JSON 格式化

pub mod json;
pub mod value;

pub use json::EventJsonFormatter;
pub use value::JsonValueFormatter;
