use std::collections::HashMap;

use num_bigint::BigUint;
use serde::Deserialize;
use tiny_keccak::{Hasher, Keccak};
use tracing::debug;

use crate::error::AbiError;
use crate::types::address::Address;

/// Parsed function signature.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<ParamType>,
    pub canonical: String,
    pub selector: [u8; 4],
}

/// ABI parameter types, recursive to support tuples and arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint(usize),
    Int(usize),
    Bool,
    Bytes,
    FixedBytes(usize),
    String,
    Array(Box<ParamType>),
    FixedArray(Box<ParamType>, usize),
    Tuple(Vec<ParamType>),
}

impl ParamType {
    /// Whether this type is dynamically-sized in ABI encoding.
    pub fn is_dynamic(&self) -> bool {
        match self {
            ParamType::Bytes | ParamType::String => true,
            ParamType::Array(_) => true,
            ParamType::FixedArray(inner, _) => inner.is_dynamic(),
            ParamType::Tuple(members) => members.iter().any(|m| m.is_dynamic()),
            _ => false,
        }
    }
}

/// An ABI value, either a call argument or a decoded return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(BigUint),
    /// Raw 32-byte two's complement word.
    Int(Vec<u8>),
    Bool(bool),
    Bytes(Vec<u8>),
    FixedBytes(Vec<u8>),
    String(std::string::String),
    Array(Vec<Token>),
    Tuple(Vec<Token>),
}

impl Token {
    pub fn into_uint(self) -> Option<BigUint> {
        match self {
            Token::Uint(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<std::string::String> {
        match self {
            Token::String(s) => Some(s),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Token::Address(_) => "address",
            Token::Uint(_) => "uint",
            Token::Int(_) => "int",
            Token::Bool(_) => "bool",
            Token::Bytes(_) => "bytes",
            Token::FixedBytes(_) => "fixed bytes",
            Token::String(_) => "string",
            Token::Array(_) => "array",
            Token::Tuple(_) => "tuple",
        }
    }
}

/// Parse a function signature string into a `FunctionSignature`.
///
/// Example: `"approve(address,uint256)"` → name="approve", params=[Address, Uint(256)]
pub fn parse_signature(sig: &str) -> Result<FunctionSignature, AbiError> {
    let sig = sig.trim();
    let open = sig
        .find('(')
        .ok_or_else(|| AbiError::InvalidSignature(format!("missing '(' in: {sig}")))?;

    if !sig.ends_with(')') {
        return Err(AbiError::InvalidSignature(format!("missing ')' in: {sig}")));
    }

    let name = sig[..open].to_string();
    if name.is_empty() {
        return Err(AbiError::InvalidSignature("empty function name".to_string()));
    }

    let params_str = &sig[open + 1..sig.len() - 1];
    let params = if params_str.is_empty() {
        vec![]
    } else {
        parse_param_list(params_str)?
    };

    Ok(signature_from_parts(name, params))
}

fn signature_from_parts(name: String, params: Vec<ParamType>) -> FunctionSignature {
    let canonical = format!("{}({})", name, canonical_params(&params));
    let selector = selector_from_signature(&canonical);
    FunctionSignature {
        name,
        params,
        canonical,
        selector,
    }
}

/// Parse a comma-separated list of param types, respecting nested parentheses for tuples.
fn parse_param_list(s: &str) -> Result<Vec<ParamType>, AbiError> {
    let mut result = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| AbiError::InvalidSignature("unbalanced ')'".to_string()))?;
            }
            ',' if depth == 0 => {
                result.push(parse_param_type(s[start..i].trim())?);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(AbiError::InvalidSignature("unbalanced parentheses".to_string()));
    }

    let last = s[start..].trim();
    if !last.is_empty() {
        result.push(parse_param_type(last)?);
    }

    Ok(result)
}

/// Parse a single param type string.
pub fn parse_param_type(s: &str) -> Result<ParamType, AbiError> {
    let s = s.trim();

    // `type[]` or `type[N]`
    if let Some(bracket_pos) = s.rfind('[') {
        if s.ends_with(']') {
            let inner = parse_param_type(&s[..bracket_pos])?;
            let size_str = &s[bracket_pos + 1..s.len() - 1];

            if size_str.is_empty() {
                return Ok(ParamType::Array(Box::new(inner)));
            }
            let size: usize = size_str.parse().map_err(|_| {
                AbiError::InvalidSignature(format!("invalid array size: {size_str}"))
            })?;
            return Ok(ParamType::FixedArray(Box::new(inner), size));
        }
    }

    if s.starts_with('(') && s.ends_with(')') {
        let inner = &s[1..s.len() - 1];
        let members = if inner.is_empty() {
            vec![]
        } else {
            parse_param_list(inner)?
        };
        return Ok(ParamType::Tuple(members));
    }

    match s {
        "address" => Ok(ParamType::Address),
        "bool" => Ok(ParamType::Bool),
        "string" => Ok(ParamType::String),
        "bytes" => Ok(ParamType::Bytes),
        _ if s.starts_with("uint") => {
            let bits = if s == "uint" {
                256
            } else {
                s[4..].parse::<usize>().map_err(|_| {
                    AbiError::InvalidSignature(format!("invalid uint width: {s}"))
                })?
            };
            Ok(ParamType::Uint(bits))
        }
        _ if s.starts_with("int") => {
            let bits = if s == "int" {
                256
            } else {
                s[3..].parse::<usize>().map_err(|_| {
                    AbiError::InvalidSignature(format!("invalid int width: {s}"))
                })?
            };
            Ok(ParamType::Int(bits))
        }
        _ if s.starts_with("bytes") => {
            let size: usize = s[5..].parse().map_err(|_| {
                AbiError::InvalidSignature(format!("invalid bytes width: {s}"))
            })?;
            Ok(ParamType::FixedBytes(size))
        }
        _ => Err(AbiError::InvalidSignature(format!("unknown type: {s}"))),
    }
}

/// Build a canonical param string for selector computation.
fn canonical_params(params: &[ParamType]) -> String {
    params
        .iter()
        .map(canonical_param)
        .collect::<Vec<_>>()
        .join(",")
}

fn canonical_param(p: &ParamType) -> String {
    match p {
        ParamType::Address => "address".to_string(),
        ParamType::Uint(bits) => format!("uint{bits}"),
        ParamType::Int(bits) => format!("int{bits}"),
        ParamType::Bool => "bool".to_string(),
        ParamType::Bytes => "bytes".to_string(),
        ParamType::FixedBytes(size) => format!("bytes{size}"),
        ParamType::String => "string".to_string(),
        ParamType::Array(inner) => format!("{}[]", canonical_param(inner)),
        ParamType::FixedArray(inner, size) => format!("{}[{size}]", canonical_param(inner)),
        ParamType::Tuple(members) => {
            let inner = members.iter().map(canonical_param).collect::<Vec<_>>().join(",");
            format!("({inner})")
        }
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    hash
}

/// Compute the 4-byte selector from a canonical function signature.
pub fn selector_from_signature(canonical: &str) -> [u8; 4] {
    let hash = keccak256(canonical.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encode a call: selector followed by one 32-byte head word per argument.
///
/// Only statically-sized arguments are supported; none of the bound
/// contract methods take dynamic ones.
pub fn encode_call(sig: &FunctionSignature, args: &[Token]) -> Result<Vec<u8>, AbiError> {
    if args.len() != sig.params.len() {
        return Err(AbiError::ArgumentMismatch {
            function: sig.canonical.clone(),
            reason: format!("expected {} arguments, got {}", sig.params.len(), args.len()),
        });
    }

    let mut out = Vec::with_capacity(4 + 32 * args.len());
    out.extend_from_slice(&sig.selector);
    for (param, arg) in sig.params.iter().zip(args) {
        let word = encode_word(param, arg).map_err(|reason| AbiError::ArgumentMismatch {
            function: sig.canonical.clone(),
            reason,
        })?;
        out.extend_from_slice(&word);
    }
    Ok(out)
}

fn encode_word(param: &ParamType, arg: &Token) -> Result<[u8; 32], String> {
    let mut word = [0u8; 32];
    match (param, arg) {
        (ParamType::Address, Token::Address(addr)) => {
            word[12..].copy_from_slice(&addr.0);
        }
        (ParamType::Uint(bits), Token::Uint(n)) => {
            if n.bits() > *bits as u64 {
                return Err(format!("{n} does not fit in uint{bits}"));
            }
            let bytes = n.to_bytes_be();
            word[32 - bytes.len()..].copy_from_slice(&bytes);
        }
        (ParamType::Int(_), Token::Int(raw)) => {
            if raw.len() != 32 {
                return Err(format!("int word must be 32 bytes, got {}", raw.len()));
            }
            word.copy_from_slice(raw);
        }
        (ParamType::Bool, Token::Bool(b)) => {
            word[31] = u8::from(*b);
        }
        (ParamType::FixedBytes(size), Token::FixedBytes(bytes)) => {
            if bytes.len() != *size || *size > 32 {
                return Err(format!("expected bytes{size}, got {} bytes", bytes.len()));
            }
            word[..bytes.len()].copy_from_slice(bytes);
        }
        (p, _) if p.is_dynamic() => {
            return Err(format!("dynamic type {} is not supported", canonical_param(p)));
        }
        (p, t) => {
            return Err(format!("expected {}, got {}", canonical_param(p), t.type_name()));
        }
    }
    Ok(word)
}

/// Decode return data for the given output types.
pub fn decode_output(params: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    let mut values = Vec::with_capacity(params.len());
    let mut offset = 0;
    for param in params {
        values.push(decode_value(param, data, offset)?);
        offset += head_size(param);
    }
    Ok(values)
}

/// Size of a parameter's head section in bytes.
fn head_size(param: &ParamType) -> usize {
    match param {
        _ if param.is_dynamic() => 32,
        ParamType::FixedArray(inner, len) => head_size(inner) * len,
        ParamType::Tuple(members) => members.iter().map(head_size).sum(),
        _ => 32,
    }
}

/// Decode a single value from ABI-encoded data.
fn decode_value(param: &ParamType, data: &[u8], head_offset: usize) -> Result<Token, AbiError> {
    if param.is_dynamic() {
        let offset = read_u256_as_usize(data, head_offset)?;
        decode_value_at(param, data, offset)
    } else {
        decode_value_at(param, data, head_offset)
    }
}

/// Decode a value at a specific byte offset.
fn decode_value_at(param: &ParamType, data: &[u8], offset: usize) -> Result<Token, AbiError> {
    ensure_bytes(data, offset, 32)?;

    match param {
        ParamType::Address => {
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&data[offset + 12..offset + 32]);
            Ok(Token::Address(Address(addr)))
        }
        ParamType::Uint(_) => Ok(Token::Uint(BigUint::from_bytes_be(&data[offset..offset + 32]))),
        ParamType::Int(_) => Ok(Token::Int(data[offset..offset + 32].to_vec())),
        ParamType::Bool => Ok(Token::Bool(data[offset + 31] != 0)),
        ParamType::FixedBytes(size) => {
            ensure_bytes(data, offset, *size)?;
            Ok(Token::FixedBytes(data[offset..offset + size].to_vec()))
        }
        ParamType::Bytes => {
            let len = read_u256_as_usize(data, offset)?;
            let start = offset + 32;
            ensure_bytes(data, start, len)?;
            Ok(Token::Bytes(data[start..start + len].to_vec()))
        }
        ParamType::String => {
            let len = read_u256_as_usize(data, offset)?;
            let start = offset + 32;
            ensure_bytes(data, start, len)?;
            let s = std::str::from_utf8(&data[start..start + len])
                .map_err(|e| AbiError::InvalidEncoding(format!("invalid UTF-8: {e}")))?;
            Ok(Token::String(s.to_string()))
        }
        ParamType::Array(inner) => {
            let len = read_u256_as_usize(data, offset)?;
            // Elements are encoded relative to the start of the array body.
            let body = &data[offset + 32..];
            decode_sequence(std::iter::repeat_n(inner.as_ref(), len), body).map(Token::Array)
        }
        ParamType::FixedArray(inner, len) => {
            let body = if param.is_dynamic() { &data[offset..] } else { data };
            let start = if param.is_dynamic() { 0 } else { offset };
            decode_sequence_from(std::iter::repeat_n(inner.as_ref(), *len), body, start)
                .map(Token::Array)
        }
        ParamType::Tuple(members) => {
            let body = if param.is_dynamic() { &data[offset..] } else { data };
            let start = if param.is_dynamic() { 0 } else { offset };
            decode_sequence_from(members.iter(), body, start).map(Token::Tuple)
        }
    }
}

fn decode_sequence<'a>(
    types: impl Iterator<Item = &'a ParamType>,
    data: &[u8],
) -> Result<Vec<Token>, AbiError> {
    decode_sequence_from(types, data, 0)
}

fn decode_sequence_from<'a>(
    types: impl Iterator<Item = &'a ParamType>,
    data: &[u8],
    start: usize,
) -> Result<Vec<Token>, AbiError> {
    let mut values = Vec::new();
    let mut offset = start;
    for ty in types {
        values.push(decode_value(ty, data, offset)?);
        offset += head_size(ty);
    }
    Ok(values)
}

fn read_u256_as_usize(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    ensure_bytes(data, offset, 32)?;
    let word = &data[offset..offset + 32];
    if word[..24].iter().any(|&b| b != 0) {
        return Err(AbiError::InvalidEncoding("offset too large for usize".to_string()));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..32]);
    usize::try_from(u64::from_be_bytes(bytes))
        .map_err(|_| AbiError::InvalidEncoding("offset too large for usize".to_string()))
}

fn ensure_bytes(data: &[u8], offset: usize, len: usize) -> Result<(), AbiError> {
    match offset.checked_add(len) {
        Some(end) if end <= data.len() => Ok(()),
        _ => Err(AbiError::DataTooShort {
            expected: offset.saturating_add(len),
            actual: data.len(),
        }),
    }
}

// ---------------------------------------------------------------------------
// ABI JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct JsonParam {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    components: Vec<JsonParam>,
}

#[derive(Debug, Deserialize)]
struct JsonItem {
    #[serde(rename = "type", default = "default_item_type")]
    item_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    inputs: Vec<JsonParam>,
    #[serde(default)]
    outputs: Vec<JsonParam>,
    #[serde(rename = "stateMutability", default)]
    state_mutability: Option<String>,
}

fn default_item_type() -> String {
    "function".to_string()
}

fn param_type_from_json(param: &JsonParam) -> Result<ParamType, AbiError> {
    match param.kind.strip_prefix("tuple") {
        Some(suffix) => {
            let members = param
                .components
                .iter()
                .map(param_type_from_json)
                .collect::<Result<Vec<_>, _>>()?;
            let tuple = format!("({}){suffix}", canonical_params(&members));
            parse_param_type(&tuple)
        }
        None => parse_param_type(&param.kind),
    }
}

/// A function entry from a contract's ABI JSON.
#[derive(Debug, Clone)]
pub struct AbiFunction {
    pub signature: FunctionSignature,
    pub outputs: Vec<ParamType>,
    pub output_names: Vec<String>,
    pub payable: bool,
}

impl AbiFunction {
    pub fn encode(&self, args: &[Token]) -> Result<Vec<u8>, AbiError> {
        encode_call(&self.signature, args)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<Token>, AbiError> {
        decode_output(&self.outputs, data)
    }

    /// Decode and return the first output.
    pub fn decode_single(&self, data: &[u8]) -> Result<Token, AbiError> {
        self.decode(data)?.into_iter().next().ok_or_else(|| {
            AbiError::InvalidEncoding(format!("`{}` has no outputs", self.signature.name))
        })
    }

    /// Decode and return the output called `name`.
    pub fn decode_named(&self, data: &[u8], name: &str) -> Result<Token, AbiError> {
        let index = self
            .output_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| {
                AbiError::InvalidEncoding(format!(
                    "`{}` has no output named `{name}`",
                    self.signature.name
                ))
            })?;
        self.decode(data)?
            .into_iter()
            .nth(index)
            .ok_or_else(|| AbiError::InvalidEncoding(format!("missing output `{name}`")))
    }
}

/// A parsed contract interface description.
#[derive(Debug, Clone)]
pub struct Abi {
    contract: String,
    functions: HashMap<String, AbiFunction>,
}

impl Abi {
    /// Parse a standard Solidity ABI JSON array.
    ///
    /// Accepts either the bare array or a build artifact with an `abi` field.
    /// Overloaded names resolve to the first declaration.
    pub fn from_json(contract: &str, json: &str) -> Result<Self, AbiError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| AbiError::Parse(e.to_string()))?;
        let items_value = match value {
            serde_json::Value::Object(mut obj) => obj
                .remove("abi")
                .ok_or_else(|| AbiError::Parse("expected an array or an `abi` field".into()))?,
            other => other,
        };
        let items: Vec<JsonItem> =
            serde_json::from_value(items_value).map_err(|e| AbiError::Parse(e.to_string()))?;

        let mut functions = HashMap::new();
        for item in items {
            if item.item_type != "function" {
                continue;
            }
            let Some(name) = item.name else { continue };

            let params = item
                .inputs
                .iter()
                .map(param_type_from_json)
                .collect::<Result<Vec<_>, _>>()?;
            let outputs = item
                .outputs
                .iter()
                .map(param_type_from_json)
                .collect::<Result<Vec<_>, _>>()?;
            let output_names = item.outputs.iter().map(|o| o.name.clone()).collect();

            if functions.contains_key(&name) {
                debug!(contract, function = %name, "ignoring overloaded ABI entry");
                continue;
            }
            functions.insert(
                name.clone(),
                AbiFunction {
                    signature: signature_from_parts(name, params),
                    outputs,
                    output_names,
                    payable: item.state_mutability.as_deref() == Some("payable"),
                },
            );
        }

        Ok(Self {
            contract: contract.to_string(),
            functions,
        })
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn function(&self, name: &str) -> Result<&AbiFunction, AbiError> {
        self.functions
            .get(name)
            .ok_or_else(|| AbiError::MissingFunction {
                contract: self.contract.clone(),
                function: name.to_string(),
            })
    }

    /// Check that every name in `names` is declared.
    pub fn require(&self, names: &[&str]) -> Result<(), AbiError> {
        names.iter().try_for_each(|name| self.function(name).map(|_| ()))
    }
}
