//! 规范 JSON 序列化：
//! 1. 对象 key 递归排序（默认按 key 字典序，可自定义比较器）。
//! 2. 数组保持原顺序；标量按 JSON 字面量规则编码。
//! 3. 共享节点形成环时报 `CyclicStructure`，或按配置输出 `"__cycle__"` 标记。
//!
//! 签名双方只要字段内容一致，序列化结果就一致，与插入顺序无关。

use std::{cell::RefCell, cmp::Ordering, rc::Rc};

use serde_json::{Number, Value};

use crate::error::{ProtocolError, Result};

/// 环引用标记。
const CYCLE_SENTINEL: &str = "__cycle__";

/// 可序列化节点。对象以插入顺序保存，排序只在输出时发生。
#[derive(Debug, Clone)]
pub enum Node {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Node>),
    Object(Vec<(String, Node)>),
    /// 共享引用，可指向祖先节点从而成环。
    Shared(Rc<RefCell<Node>>),
}

impl Node {
    /// 按给定顺序构造对象节点。
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Node)>,
    {
        Node::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    /// 包装为共享节点，返回可继续挂接的句柄。
    pub fn shared(node: Node) -> Rc<RefCell<Node>> {
        Rc::new(RefCell::new(node))
    }
}

impl From<&Value> for Node {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(flag) => Node::Bool(*flag),
            Value::Number(number) => Node::Number(number.clone()),
            Value::String(text) => Node::String(text.clone()),
            Value::Array(items) => Node::Array(items.iter().map(Node::from).collect()),
            Value::Object(map) => Node::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Node::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::String(value.to_string())
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Node::Number(Number::from(value))
    }
}

/// 比较器看到的对象条目。
#[derive(Debug, Clone, Copy)]
pub struct Entry<'n> {
    pub key: &'n str,
    pub value: &'n Node,
}

/// 变换函数的返回值。
#[derive(Debug, Clone)]
pub enum Replacement {
    /// 保留原值。
    Keep,
    /// 替换为新节点。
    Replace(Node),
    /// 视为 undefined：对象中跳过该 key，数组中输出 `null`。
    Omit,
}

type Comparator<'a> = Box<dyn Fn(&Entry<'_>, &Entry<'_>) -> Ordering + 'a>;
type Replacer<'a> = Box<dyn Fn(&str, &Node) -> Replacement + 'a>;

/// 规范序列化器。
#[derive(Default)]
pub struct CanonicalSerializer<'a> {
    space: String,
    cycles: bool,
    comparator: Option<Comparator<'a>>,
    replacer: Option<Replacer<'a>>,
}

impl<'a> CanonicalSerializer<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 `width` 个空格缩进美化输出；0 表示紧凑输出。
    pub fn with_indent(mut self, width: usize) -> Self {
        self.space = " ".repeat(width);
        self
    }

    /// 以任意字符串缩进美化输出。
    pub fn with_space(mut self, space: impl Into<String>) -> Self {
        self.space = space.into();
        self
    }

    /// 环引用输出为 `"__cycle__"` 而不是报错。
    pub fn allow_cycles(mut self, allow: bool) -> Self {
        self.cycles = allow;
        self
    }

    /// 自定义对象条目排序。
    pub fn with_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&Entry<'_>, &Entry<'_>) -> Ordering + 'a,
    {
        self.comparator = Some(Box::new(comparator));
        self
    }

    /// 自定义值变换，参数为 (key, value)；数组元素的 key 为下标。
    pub fn with_replacer<F>(mut self, replacer: F) -> Self
    where
        F: Fn(&str, &Node) -> Replacement + 'a,
    {
        self.replacer = Some(Box::new(replacer));
        self
    }

    /// 序列化节点；根节点被变换为 undefined 时返回空串。
    pub fn serialize(&self, node: &Node) -> Result<String> {
        let mut path = Vec::new();
        Ok(self.emit("", node, 0, &mut path)?.unwrap_or_default())
    }

    /// 序列化 JSON 值。
    pub fn serialize_value(&self, value: &Value) -> Result<String> {
        self.serialize(&Node::from(value))
    }

    /// 处理单个 (key, node)：先解共享引用，再应用变换。
    fn emit(
        &self,
        key: &str,
        node: &Node,
        level: usize,
        path: &mut Vec<*const RefCell<Node>>,
    ) -> Result<Option<String>> {
        if let Node::Shared(cell) = node {
            return self.enter_shared(cell, path, |this, inner, path| {
                this.emit(key, inner, level, path)
            });
        }

        let replaced;
        let node = match self.replacer.as_ref().map(|replacer| replacer(key, node)) {
            None | Some(Replacement::Keep) => node,
            Some(Replacement::Omit) => return Ok(None),
            Some(Replacement::Replace(next)) => {
                replaced = next;
                &replaced
            }
        };
        self.render(node, level, path)
    }

    /// 进入共享节点：路径上已出现则为环。
    fn enter_shared<F>(
        &self,
        cell: &Rc<RefCell<Node>>,
        path: &mut Vec<*const RefCell<Node>>,
        visit: F,
    ) -> Result<Option<String>>
    where
        F: FnOnce(&Self, &Node, &mut Vec<*const RefCell<Node>>) -> Result<Option<String>>,
    {
        let ptr = Rc::as_ptr(cell);
        if path.contains(&ptr) {
            if self.cycles {
                return Ok(Some(json_string(CYCLE_SENTINEL)));
            }
            return Err(ProtocolError::CyclicStructure);
        }
        path.push(ptr);
        let inner = cell.borrow();
        let out = visit(self, &*inner, path);
        path.pop();
        out
    }

    /// 输出已完成变换的节点。
    fn render(
        &self,
        node: &Node,
        level: usize,
        path: &mut Vec<*const RefCell<Node>>,
    ) -> Result<Option<String>> {
        let indent = if self.space.is_empty() {
            String::new()
        } else {
            format!("\n{}", self.space.repeat(level))
        };

        let out = match node {
            Node::Null => "null".to_string(),
            Node::Bool(flag) => flag.to_string(),
            Node::Number(number) => format_number(number),
            Node::String(text) => json_string(text),
            Node::Shared(cell) => {
                return self.enter_shared(cell, path, |this, inner, path| {
                    this.render(inner, level, path)
                });
            }
            Node::Array(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let value = self
                        .emit(&index.to_string(), item, level + 1, path)?
                        .unwrap_or_else(|| "null".to_string());
                    parts.push(format!("{indent}{}{value}", self.space));
                }
                format!("[{}{indent}]", parts.join(","))
            }
            Node::Object(entries) => {
                let colon = if self.space.is_empty() { ":" } else { ": " };
                let mut ordered: Vec<&(String, Node)> = entries.iter().collect();
                match self.comparator.as_ref() {
                    Some(comparator) => ordered.sort_by(|a, b| {
                        comparator(
                            &Entry {
                                key: &a.0,
                                value: &a.1,
                            },
                            &Entry {
                                key: &b.0,
                                value: &b.1,
                            },
                        )
                    }),
                    None => ordered.sort_by(|a, b| a.0.cmp(&b.0)),
                }

                let mut parts = Vec::with_capacity(ordered.len());
                for (key, value) in ordered {
                    let Some(value) = self.emit(key, value, level + 1, path)? else {
                        continue;
                    };
                    parts.push(format!(
                        "{indent}{}{}{colon}{value}",
                        self.space,
                        json_string(key)
                    ));
                }
                format!("{{{}{indent}}}", parts.join(","))
            }
        };
        Ok(Some(out))
    }
}

/// 紧凑、按 key 字典序的规范 JSON。
pub fn canonical_json(value: &Value) -> Result<String> {
    CanonicalSerializer::new().serialize_value(value)
}

/// JSON 字符串字面量。
fn json_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

/// 数字字面量：整数值的浮点数按整数输出，与 JSON.stringify 保持一致。
fn format_number(number: &Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    match number.as_f64() {
        Some(value) if !value.is_finite() => "null".to_string(),
        Some(value) if value == 0.0 => "0".to_string(),
        Some(value) if value.fract() == 0.0 && value.abs() < 1e21 => format!("{value:.0}"),
        _ => number.to_string(),
    }
}
