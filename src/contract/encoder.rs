//! Call payload encoding and return data decoding
//!
//! Payloads use the canonical Solidity ABI encoding: the first 4 bytes of
//! keccak256 over the canonical signature, followed by the head/tail encoded
//! arguments. Encoding is a pure function of (interface, method, arguments).

use crate::error::{PipelineError, PipelineResult};

use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{Abi, Function, Token};
use ethers::types::{Bytes, U256};
use ethers::utils::to_checksum;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;
use tracing::warn;

/// Encoded method call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPayload {
    pub selector: [u8; 4],
    pub arguments: Vec<u8>,
}

impl CallPayload {
    /// Selector followed by encoded arguments
    pub fn to_bytes(&self) -> Bytes {
        let mut data = Vec::with_capacity(4 + self.arguments.len());
        data.extend_from_slice(&self.selector);
        data.extend_from_slice(&self.arguments);
        Bytes::from(data)
    }
}

impl fmt::Display for CallPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{}{}",
            hex::encode(self.selector),
            hex::encode(&self.arguments)
        )
    }
}

/// A decoded return value paired with its declared name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    pub name: String,
    pub value: Token,
}

impl fmt::Display for NamedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", format_token(&self.value))
        } else {
            write!(f, "{}={}", self.name, format_token(&self.value))
        }
    }
}

impl Serialize for NamedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("NamedValue", 2)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("value", &format_token(&self.value))?;
        state.end()
    }
}

/// Canonical signature, e.g. `modifyRewardPerBlock(uint256,uint256)`
pub fn canonical_signature(function: &Function) -> String {
    let inputs: Vec<String> = function.inputs.iter().map(|p| p.kind.to_string()).collect();
    format!("{}({})", function.name, inputs.join(","))
}

/// Find the overload of `method` with the given arity.
///
/// `method` may be a bare name or a canonical signature; a signature pins the
/// overload exactly.
pub fn find_function<'a>(abi: &'a Abi, method: &str, arity: usize) -> PipelineResult<&'a Function> {
    let (name, pinned) = match method.find('(') {
        Some(idx) => (&method[..idx], true),
        None => (method, false),
    };

    let overloads = abi.functions_by_name(name).map_err(|_| {
        let mut available: Vec<&str> = abi.functions.keys().map(String::as_str).collect();
        available.sort_unstable();
        encoding_error(
            method,
            format!("no such method (available: {})", available.join(", ")),
        )
    })?;

    let candidates: Vec<&Function> = overloads
        .iter()
        .filter(|f| {
            if pinned {
                canonical_signature(f) == method
            } else {
                f.inputs.len() == arity
            }
        })
        .collect();

    match candidates.as_slice() {
        [function] if function.inputs.len() == arity => Ok(*function),
        [function] => Err(encoding_error(
            method,
            format!("expected {} arguments, got {}", function.inputs.len(), arity),
        )),
        [] if pinned => Err(encoding_error(method, "no overload with this signature")),
        [] => {
            let expected: Vec<String> = overloads.iter().map(|f| f.inputs.len().to_string()).collect();
            Err(encoding_error(
                method,
                format!("expected {} arguments, got {}", expected.join(" or "), arity),
            ))
        }
        _ => Err(encoding_error(
            method,
            "ambiguous overload; pass the full signature",
        )),
    }
}

/// Encode a call to `method` with typed arguments
pub fn encode(abi: &Abi, method: &str, args: &[Token]) -> PipelineResult<CallPayload> {
    let function = find_function(abi, method, args.len())?;

    for (idx, (param, token)) in function.inputs.iter().zip(args).enumerate() {
        if !token.type_check(&param.kind) {
            return Err(encoding_error(
                method,
                format!("argument {} ({}) is not a {}", idx, param.name, param.kind),
            ));
        }
    }

    let encoded = function
        .encode_input(args)
        .map_err(|e| encoding_error(method, e.to_string()))?;

    Ok(CallPayload {
        selector: function.short_signature(),
        arguments: encoded[4..].to_vec(),
    })
}

/// Parse operator-supplied strings into tokens of the declared parameter types
pub fn tokenize(abi: &Abi, method: &str, raw: &[String]) -> PipelineResult<Vec<Token>> {
    let function = find_function(abi, method, raw.len())?;

    function
        .inputs
        .iter()
        .zip(raw)
        .enumerate()
        .map(|(idx, (param, value))| {
            LenientTokenizer::tokenize(&param.kind, value).map_err(|e| {
                encoding_error(
                    method,
                    format!("argument {} ({}): cannot parse {:?} as {}: {}", idx, param.name, value, param.kind, e),
                )
            })
        })
        .collect()
}

/// Decode return data of `method` into named values
pub fn decode_output(
    abi: &Abi,
    method: &str,
    arity: usize,
    data: &[u8],
) -> PipelineResult<Vec<NamedValue>> {
    let function = find_function(abi, method, arity)?;
    let tokens = function
        .decode_output(data)
        .map_err(|e| encoding_error(method, format!("cannot decode return data: {}", e)))?;

    Ok(function
        .outputs
        .iter()
        .zip(tokens)
        .map(|(param, value)| NamedValue {
            name: param.name.clone(),
            value,
        })
        .collect())
}

/// Convert a decimal amount into base units, rounding half-up.
///
/// A nonzero amount that rounds to zero is an error.
pub fn scale_decimal(amount: &str, decimals: u32) -> Result<U256, String> {
    let amount = amount.trim();
    let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));

    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(format!("not a decimal number: {:?}", amount));
    }
    if decimals > 77 {
        return Err(format!("decimals {} exceed uint256 range", decimals));
    }

    let decimals = decimals as usize;
    let (kept, dropped) = fraction.split_at(fraction.len().min(decimals));
    let digits = format!("{}{}{}", whole, kept, "0".repeat(decimals - kept.len()));

    let mut value = if digits.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(&digits).map_err(|e| format!("amount {} out of range: {}", amount, e))?
    };
    if dropped.bytes().next().map_or(false, |b| b >= b'5') {
        value = value
            .checked_add(U256::one())
            .ok_or_else(|| format!("amount {} out of range", amount))?;
    }

    let nonzero = |s: &str| s.bytes().any(|b| b != b'0');
    if value.is_zero() && (nonzero(whole) || nonzero(fraction)) {
        return Err(format!(
            "amount {} rounds to zero with {} decimals",
            amount, decimals
        ));
    }
    if nonzero(dropped) {
        warn!(
            "Amount {} has more than {} fraction digits; sending {}",
            amount, decimals, value
        );
    }

    Ok(value)
}

/// Human-readable rendering of a token: integers in decimal, addresses checksummed
pub fn format_token(token: &Token) -> String {
    match token {
        Token::Address(address) => to_checksum(address, None),
        Token::Uint(value) => value.to_string(),
        Token::Int(value) => {
            // Two's complement
            if value.bit(255) {
                format!("-{}", (!*value).overflowing_add(U256::one()).0)
            } else {
                value.to_string()
            }
        }
        Token::Bool(value) => value.to_string(),
        Token::String(value) => format!("{:?}", value),
        Token::Bytes(bytes) | Token::FixedBytes(bytes) => format!("0x{}", hex::encode(bytes)),
        Token::Array(items) | Token::FixedArray(items) => {
            let items: Vec<String> = items.iter().map(format_token).collect();
            format!("[{}]", items.join(", "))
        }
        Token::Tuple(items) => {
            let items: Vec<String> = items.iter().map(format_token).collect();
            format!("({})", items.join(", "))
        }
    }
}

fn encoding_error(method: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::Encoding {
        method: method.to_string(),
        message: message.into(),
    }
}
