//! Transaction classifier — maps raw request params to an approval category.
//!
//! Detectors run in a fixed priority order and the first match wins:
//! swap > nft-mint > payment > approve > stake > defi > transfer > generic.
//! Each looks at explicit metadata hints (`metadata.type`, `metadata.action`)
//! and at the program ids and instruction data in `calls`.
//!
//! Confidence values are fixed per-category priors. They rank how specific a
//! detector's evidence usually is; they are not probabilities.
//!
//! Classification is total: malformed input classifies as `generic`.

pub mod programs;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use solana_pubkey::Pubkey;

use crate::rpc::RpcCall;
use crate::shared::{base_units_to_decimal, lamports_to_sol};

use programs::{token_instruction, KnownProgram, ProgramCategory, SYSTEM_PROGRAM_ID, SYSTEM_TRANSFER_TAG};

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxType {
    Swap,
    NftMint,
    Payment,
    Transfer,
    Approve,
    Stake,
    Defi,
    Generic,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Swap => "swap",
            TxType::NftMint => "nft-mint",
            TxType::Payment => "payment",
            TxType::Transfer => "transfer",
            TxType::Approve => "approve",
            TxType::Stake => "stake",
            TxType::Defi => "defi",
            TxType::Generic => "generic",
        }
    }
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub details: Map<String, Value>,
    pub confidence: f64,
}

pub const GENERIC_CONFIDENCE: f64 = 0.5;

impl ClassificationResult {
    pub fn generic() -> Self {
        Self {
            tx_type: TxType::Generic,
            details: Map::new(),
            confidence: GENERIC_CONFIDENCE,
        }
    }
}

/// Which approval screen a request gets.
#[derive(Debug, Clone, PartialEq)]
pub enum Presentation {
    Connect,
    SignMessage,
    Transaction(ClassificationResult),
    Generic,
}

impl Presentation {
    pub fn for_call(call: &RpcCall) -> Self {
        match call {
            RpcCall::Connect => Presentation::Connect,
            RpcCall::SignMessage(_) => Presentation::SignMessage,
            other => match other.transaction_params() {
                Some(params) => Presentation::Transaction(classify(params)),
                None => Presentation::Generic,
            },
        }
    }
}

// ─── Detector table ──────────────────────────────────────────────────────────

type Details = Map<String, Value>;

/// One row of the priority table.
pub struct Detector {
    pub tx_type: TxType,
    pub confidence: f64,
    detect: fn(&Facts) -> Option<Details>,
}

/// In priority order.
pub static DETECTORS: [Detector; 7] = [
    Detector { tx_type: TxType::Swap, confidence: 0.95, detect: detect_swap },
    Detector { tx_type: TxType::NftMint, confidence: 0.90, detect: detect_nft_mint },
    Detector { tx_type: TxType::Payment, confidence: 0.90, detect: detect_payment },
    Detector { tx_type: TxType::Approve, confidence: 0.85, detect: detect_approve },
    Detector { tx_type: TxType::Stake, confidence: 0.85, detect: detect_stake },
    Detector { tx_type: TxType::Defi, confidence: 0.75, detect: detect_defi },
    Detector { tx_type: TxType::Transfer, confidence: 0.80, detect: detect_transfer },
];

/// Classify raw request params (`{calls?, metadata?}`).
pub fn classify(params: &Value) -> ClassificationResult {
    let facts = Facts::gather(params);
    for detector in DETECTORS.iter() {
        if let Some(details) = (detector.detect)(&facts) {
            tracing::debug!("Classified request as {}", detector.tx_type);
            return ClassificationResult {
                tx_type: detector.tx_type,
                details,
                confidence: detector.confidence,
            };
        }
    }

    let mut result = ClassificationResult::generic();
    if !facts.calls.is_empty() {
        result.details.insert("calls".into(), Value::from(facts.calls.len()));
    }
    result
}

// ─── Facts ───────────────────────────────────────────────────────────────────

/// What the detectors look at, extracted once.
struct Facts<'a> {
    metadata: Option<&'a Map<String, Value>>,
    hint_type: Option<String>,
    hint_action: Option<String>,
    calls: Vec<Call>,
}

struct Call {
    program: Option<Pubkey>,
    data: Option<Vec<u8>>,
}

impl Call {
    fn from_value(value: &Value) -> Self {
        let program = ["programId", "program", "to"]
            .iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .and_then(|s| Pubkey::from_str(s).ok());
        let data = value.get("data").and_then(decode_data);
        Self { program, data }
    }

    fn known(&self) -> Option<&'static KnownProgram> {
        self.program.as_ref().and_then(programs::lookup)
    }

    fn token_tag(&self) -> Option<u8> {
        match (&self.program, &self.data) {
            (Some(program), Some(data)) if programs::is_token_program(program) => data.first().copied(),
            _ => None,
        }
    }
}

impl<'a> Facts<'a> {
    fn gather(params: &'a Value) -> Self {
        let metadata = params.get("metadata").and_then(Value::as_object);
        let hint = |key: &str| {
            metadata
                .and_then(|m| m.get(key))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_ascii_lowercase().replace('_', "-"))
        };

        let calls = params
            .get("calls")
            .and_then(Value::as_array)
            .map(|calls| calls.iter().map(Call::from_value).collect())
            .unwrap_or_default();

        Self {
            hint_type: hint("type"),
            hint_action: hint("action"),
            metadata,
            calls,
        }
    }

    /// True if `metadata.type` or `metadata.action` is one of `words`.
    fn hinted(&self, words: &[&str]) -> bool {
        [&self.hint_type, &self.hint_action]
            .into_iter()
            .flatten()
            .any(|h| words.contains(&h.as_str()))
    }

    fn first_in(&self, category: ProgramCategory) -> Option<&'static KnownProgram> {
        self.calls
            .iter()
            .filter_map(Call::known)
            .find(|p| p.category == category)
    }

    /// Metadata fields worth showing, copied as-is.
    fn metadata_details(&self, keys: &[&str]) -> Details {
        let mut details = Details::new();
        details.insert("source".into(), Value::from("metadata"));
        if let Some(metadata) = self.metadata {
            for key in keys {
                if let Some(v) = metadata.get(*key) {
                    details.insert((*key).to_string(), v.clone());
                }
            }
        }
        details
    }
}

/// Instruction data as a byte array, `0x` hex, or base58.
fn decode_data(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|b| b.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex_str) => hex::decode(hex_str).ok(),
            None => bs58::decode(s).into_vec().ok(),
        },
        _ => None,
    }
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes: [u8; 8] = data.get(offset..offset + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

fn protocol_details(program: &KnownProgram) -> Details {
    let mut details = Details::new();
    details.insert("source".into(), Value::from("program"));
    details.insert("protocol".into(), Value::from(program.name));
    details.insert("programId".into(), Value::from(program.id.to_string()));
    details
}

// ─── Detectors ───────────────────────────────────────────────────────────────

fn detect_swap(facts: &Facts) -> Option<Details> {
    if facts.hinted(&["swap", "trade", "exchange"]) {
        return Some(facts.metadata_details(&[
            "fromToken",
            "toToken",
            "amountIn",
            "amountOut",
            "slippage",
        ]));
    }
    facts.first_in(ProgramCategory::Swap).map(protocol_details)
}

fn detect_nft_mint(facts: &Facts) -> Option<Details> {
    if facts.hinted(&["nft-mint", "mint-nft", "mint"]) {
        return Some(facts.metadata_details(&["collection", "name", "price", "quantity"]));
    }
    facts.first_in(ProgramCategory::NftMint).map(protocol_details)
}

/// A transfer carrying a memo (invoice/reference), or an explicit payment hint.
fn detect_payment(facts: &Facts) -> Option<Details> {
    if facts.hinted(&["payment", "pay", "checkout"]) {
        return Some(facts.metadata_details(&["amount", "recipient", "reference", "memo"]));
    }
    let memo = facts
        .calls
        .iter()
        .find(|c| c.known().map(|p| p.category) == Some(ProgramCategory::Memo))?;
    let mut details = transfer_details(facts)?;
    if let Some(text) = memo.data.as_ref().and_then(|d| std::str::from_utf8(d).ok()) {
        details.insert("memo".into(), Value::from(text));
    }
    Some(details)
}

fn detect_approve(facts: &Facts) -> Option<Details> {
    if facts.hinted(&["approve", "approval", "delegate"]) {
        return Some(facts.metadata_details(&["spender", "amount", "token"]));
    }
    facts.calls.iter().find_map(|call| {
        let tag = call.token_tag()?;
        if tag != token_instruction::APPROVE && tag != token_instruction::APPROVE_CHECKED {
            return None;
        }
        let data = call.data.as_deref()?;
        let mut details = Details::new();
        details.insert("source".into(), Value::from("instruction"));
        details.insert("instruction".into(), Value::from("approve"));
        insert_token_amount(&mut details, data, tag == token_instruction::APPROVE_CHECKED);
        Some(details)
    })
}

fn detect_stake(facts: &Facts) -> Option<Details> {
    if facts.hinted(&["stake", "staking", "unstake", "delegate-stake"]) {
        return Some(facts.metadata_details(&["validator", "amount", "pool"]));
    }
    facts.first_in(ProgramCategory::Stake).map(protocol_details)
}

fn detect_defi(facts: &Facts) -> Option<Details> {
    if facts.hinted(&["defi", "lend", "borrow", "deposit", "withdraw", "repay", "liquidity"]) {
        return Some(facts.metadata_details(&["protocol", "amount", "token", "action"]));
    }
    facts.first_in(ProgramCategory::Defi).map(protocol_details)
}

fn detect_transfer(facts: &Facts) -> Option<Details> {
    if facts.hinted(&["transfer", "send"]) {
        return Some(facts.metadata_details(&["amount", "recipient", "token"]));
    }
    transfer_details(facts)
}

/// Details of the first native SOL or SPL token transfer instruction.
fn transfer_details(facts: &Facts) -> Option<Details> {
    facts.calls.iter().find_map(|call| {
        let program = call.program.as_ref()?;
        let data = call.data.as_deref()?;
        let mut details = Details::new();
        details.insert("source".into(), Value::from("instruction"));

        if *program == SYSTEM_PROGRAM_ID && data.starts_with(&SYSTEM_TRANSFER_TAG) {
            let lamports = read_u64(data, 4)?;
            details.insert("asset".into(), Value::from("SOL"));
            details.insert("lamports".into(), Value::from(lamports));
            details.insert("amount".into(), Value::from(lamports_to_sol(lamports).to_string()));
            return Some(details);
        }

        let tag = call.token_tag()?;
        if tag == token_instruction::TRANSFER || tag == token_instruction::TRANSFER_CHECKED {
            details.insert("asset".into(), Value::from("token"));
            insert_token_amount(&mut details, data, tag == token_instruction::TRANSFER_CHECKED);
            return Some(details);
        }
        None
    })
}

/// `[tag, amount: u64 LE, decimals: u8 (checked variants only)]`.
fn insert_token_amount(details: &mut Details, data: &[u8], checked: bool) {
    let Some(raw) = read_u64(data, 1) else {
        return;
    };
    details.insert("rawAmount".into(), Value::from(raw.to_string()));
    let decimals = if checked { data.get(9).copied() } else { None };
    if let Some(decimals) = decimals {
        details.insert("decimals".into(), Value::from(decimals));
        if let Some(amount) = base_units_to_decimal(raw, u32::from(decimals)) {
            details.insert("amount".into(), Value::from(amount.to_string()));
        }
    }
}
