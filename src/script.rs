//! Script execution engine
//!
//! Scripts are decoded once into [`ScriptOperation`]s and then replayed against a
//! main stack, an alternate stack and a stack of conditional flags:
//! 1. Any push larger than 520 bytes, more than 201 non-push operations, or more
//!    than 1000 items across both stacks aborts evaluation.
//! 2. Disabled opcodes abort even inside an unexecuted branch.
//! 3. Every other operation runs only when all enclosing IF/NOTIF flags are true.
//! 4. A spend is valid when `scriptSig` then `scriptPubKey` run to completion and
//!    the top of the main stack is true.

use crate::constants::*;
use crate::error::ScriptError;
use crate::hashing::{hash160, ripemd160, sha1_hash, sha256, sha256d};
use crate::opcodes::*;
use crate::sighash::SignatureChecker;
use crate::types::ByteString;
use tokio_util::sync::CancellationToken;

/// One decoded script instruction; `data` is set for push operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOperation {
    pub opcode: u8,
    pub data: Option<ByteString>,
}

impl ScriptOperation {
    pub fn op(opcode: u8) -> Self {
        Self { opcode, data: None }
    }

    /// Push of `data` with the shortest push opcode
    pub fn push(data: &[u8]) -> Self {
        let opcode = match data.len() {
            0 => OP_0,
            n if n <= OP_PUSHBYTES_75 as usize => n as u8,
            n if n <= 0xff => OP_PUSHDATA1,
            n if n <= 0xffff => OP_PUSHDATA2,
            _ => OP_PUSHDATA4,
        };
        Self {
            opcode,
            data: Some(data.to_vec()),
        }
    }

    pub fn is_push(&self) -> bool {
        is_push(self.opcode)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode);
        let data = match &self.data {
            Some(data) => data,
            None => return,
        };
        match self.opcode {
            OP_PUSHDATA1 => out.push(data.len() as u8),
            OP_PUSHDATA2 => out.extend_from_slice(&(data.len() as u16).to_le_bytes()),
            OP_PUSHDATA4 => out.extend_from_slice(&(data.len() as u32).to_le_bytes()),
            _ => {}
        }
        out.extend_from_slice(data);
    }
}

/// Decode a serialized script; a push running past the end is an error
pub fn parse_script(script: &[u8]) -> Result<Vec<ScriptOperation>, ScriptError> {
    let mut ops = Vec::new();
    let mut pos = 0;
    while pos < script.len() {
        let start = pos;
        let opcode = script[pos];
        pos += 1;

        let len = match opcode {
            OP_0 => Some(0),
            0x01..=OP_PUSHBYTES_75 => Some(opcode as usize),
            OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4 => {
                let width = match opcode {
                    OP_PUSHDATA1 => 1,
                    OP_PUSHDATA2 => 2,
                    _ => 4,
                };
                if script.len() - pos < width {
                    return Err(ScriptError::TruncatedPush(start));
                }
                let mut buf = [0u8; 4];
                buf[..width].copy_from_slice(&script[pos..pos + width]);
                pos += width;
                Some(u32::from_le_bytes(buf) as usize)
            }
            _ => None,
        };

        let data = match len {
            Some(len) => {
                if script.len() - pos < len {
                    return Err(ScriptError::TruncatedPush(start));
                }
                let data = script[pos..pos + len].to_vec();
                pos += len;
                Some(data)
            }
            None => None,
        };
        ops.push(ScriptOperation { opcode, data });
    }
    Ok(ops)
}

/// Serialize operations back into script bytes, keeping each push opcode as decoded
pub fn encode_script(ops: &[ScriptOperation]) -> ByteString {
    let mut out = Vec::new();
    for op in ops {
        op.encode_into(&mut out);
    }
    out
}

/// Minimal sign-magnitude little-endian encoding of a script number
pub fn encode_num(value: i64) -> ByteString {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    let last = out.len() - 1;
    if out[last] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        out[last] |= 0x80;
    }
    out
}

/// Decode a script number no wider than `max_len` bytes
pub fn decode_num(bytes: &[u8], max_len: usize) -> Result<i64, ScriptError> {
    if bytes.len() > max_len {
        return Err(ScriptError::NumberOverflow(max_len));
    }
    if bytes.is_empty() {
        return Ok(0);
    }
    let mut result: i64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        result |= (*byte as i64) << (8 * i);
    }
    let last = bytes.len() - 1;
    if bytes[last] & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * last));
        return Ok(-(result & mask));
    }
    Ok(result)
}

/// A value on the script stacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackItem(ByteString);

impl StackItem {
    pub fn from_bytes(bytes: impl Into<ByteString>) -> Self {
        Self(bytes.into())
    }

    pub fn from_num(value: i64) -> Self {
        Self(encode_num(value))
    }

    pub fn from_bool(value: bool) -> Self {
        if value {
            Self(vec![1])
        } else {
            Self(Vec::new())
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> ByteString {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Any non-zero byte is true, except a lone sign bit (negative zero)
    pub fn to_bool(&self) -> bool {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return !(i == self.0.len() - 1 && *byte == 0x80);
            }
        }
        false
    }

    pub fn to_num(&self) -> Result<i64, ScriptError> {
        decode_num(&self.0, MAX_SCRIPT_NUM_SIZE)
    }
}

/// Main and alternate stacks, carried from scriptSig into scriptPubKey
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptStacks {
    pub main: Vec<StackItem>,
    pub alt: Vec<StackItem>,
}

impl ScriptStacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top(&self) -> Option<&StackItem> {
        self.main.last()
    }
}

struct Interpreter<'a> {
    ops: &'a [ScriptOperation],
    stacks: &'a mut ScriptStacks,
    checker: &'a dyn SignatureChecker,
    cancel: Option<&'a CancellationToken>,
    exec: Vec<bool>,
    op_count: usize,
    code_start: usize,
}

impl<'a> Interpreter<'a> {
    fn pop(&mut self, opcode: u8) -> Result<StackItem, ScriptError> {
        self.stacks
            .main
            .pop()
            .ok_or(ScriptError::StackUnderflow(opcode))
    }

    fn pop_num(&mut self, opcode: u8) -> Result<i64, ScriptError> {
        self.pop(opcode)?.to_num()
    }

    fn push(&mut self, item: StackItem) {
        self.stacks.main.push(item);
    }

    fn require(&self, depth: usize, opcode: u8) -> Result<(), ScriptError> {
        if self.stacks.main.len() < depth {
            return Err(ScriptError::StackUnderflow(opcode));
        }
        Ok(())
    }

    /// Item `depth` positions from the top (1 = top)
    fn peek(&self, depth: usize) -> &StackItem {
        &self.stacks.main[self.stacks.main.len() - depth]
    }

    fn executing(&self) -> bool {
        self.exec.iter().all(|flag| *flag)
    }

    fn count_op(&mut self, n: usize) -> Result<(), ScriptError> {
        self.op_count += n;
        if self.op_count > MAX_SCRIPT_OPS {
            return Err(ScriptError::OpCount);
        }
        Ok(())
    }

    /// Operations after the last executed OP_CODESEPARATOR, minus pushes of `signatures`
    fn script_code(&self, signatures: &[&[u8]]) -> Vec<ScriptOperation> {
        self.ops[self.code_start..]
            .iter()
            .filter(|op| match &op.data {
                Some(data) => !signatures.iter().any(|sig| !sig.is_empty() && *sig == data.as_slice()),
                None => true,
            })
            .cloned()
            .collect()
    }

    fn run(&mut self) -> Result<(), ScriptError> {
        for pc in 0..self.ops.len() {
            if let Some(token) = self.cancel {
                if token.is_cancelled() {
                    return Err(ScriptError::Cancelled);
                }
            }
            let op = &self.ops[pc];
            let opcode = op.opcode;
            let executing = self.executing();

            if let Some(data) = &op.data {
                if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptError::PushSize(data.len()));
                }
            }
            if opcode > OP_16 {
                self.count_op(1)?;
            }
            if is_disabled(opcode) {
                return Err(ScriptError::DisabledOpcode(opcode));
            }

            if let Some(data) = &op.data {
                if executing {
                    let item = StackItem::from_bytes(data.clone());
                    self.push(item);
                }
            } else if executing || is_conditional(opcode) || matches!(opcode, OP_VERIF | OP_VERNOTIF) {
                self.step(pc, opcode, executing)?;
            }

            if self.stacks.main.len() + self.stacks.alt.len() > MAX_STACK_SIZE {
                return Err(ScriptError::StackSize);
            }
        }

        if !self.exec.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        Ok(())
    }

    fn step(&mut self, pc: usize, opcode: u8, executing: bool) -> Result<(), ScriptError> {
        match opcode {
            OP_1NEGATE | OP_1..=OP_16 => {
                let value = small_int_value(opcode).ok_or(ScriptError::BadOpcode(opcode))?;
                self.push(StackItem::from_num(value));
            }

            OP_NOP | OP_NOP1..=OP_NOP10 => {}

            OP_IF | OP_NOTIF => {
                let mut value = false;
                if executing {
                    value = self.pop(opcode)?.to_bool();
                    if opcode == OP_NOTIF {
                        value = !value;
                    }
                }
                self.exec.push(value);
            }
            OP_ELSE => {
                let last = self.exec.last_mut().ok_or(ScriptError::UnbalancedConditional)?;
                *last = !*last;
            }
            OP_ENDIF => {
                self.exec.pop().ok_or(ScriptError::UnbalancedConditional)?;
            }
            OP_VERIFY => {
                if !self.pop(opcode)?.to_bool() {
                    return Err(ScriptError::VerifyFailed(opcode));
                }
            }
            OP_RETURN => return Err(ScriptError::OpReturn),

            OP_TOALTSTACK => {
                let item = self.pop(opcode)?;
                self.stacks.alt.push(item);
            }
            OP_FROMALTSTACK => {
                let item = self
                    .stacks
                    .alt
                    .pop()
                    .ok_or(ScriptError::StackUnderflow(opcode))?;
                self.push(item);
            }
            OP_2DROP => {
                self.require(2, opcode)?;
                self.stacks.main.truncate(self.stacks.main.len() - 2);
            }
            OP_2DUP => {
                self.require(2, opcode)?;
                let (a, b) = (self.peek(2).clone(), self.peek(1).clone());
                self.push(a);
                self.push(b);
            }
            OP_3DUP => {
                self.require(3, opcode)?;
                let (a, b, c) = (self.peek(3).clone(), self.peek(2).clone(), self.peek(1).clone());
                self.push(a);
                self.push(b);
                self.push(c);
            }
            OP_2OVER => {
                self.require(4, opcode)?;
                let (a, b) = (self.peek(4).clone(), self.peek(3).clone());
                self.push(a);
                self.push(b);
            }
            OP_2ROT => {
                self.require(6, opcode)?;
                let len = self.stacks.main.len();
                let a = self.stacks.main.remove(len - 6);
                let b = self.stacks.main.remove(len - 6);
                self.push(a);
                self.push(b);
            }
            OP_2SWAP => {
                self.require(4, opcode)?;
                let len = self.stacks.main.len();
                self.stacks.main.swap(len - 4, len - 2);
                self.stacks.main.swap(len - 3, len - 1);
            }
            OP_IFDUP => {
                self.require(1, opcode)?;
                if self.peek(1).to_bool() {
                    let top = self.peek(1).clone();
                    self.push(top);
                }
            }
            OP_DEPTH => {
                let depth = self.stacks.main.len() as i64;
                self.push(StackItem::from_num(depth));
            }
            OP_DROP => {
                self.pop(opcode)?;
            }
            OP_DUP => {
                self.require(1, opcode)?;
                let top = self.peek(1).clone();
                self.push(top);
            }
            OP_NIP => {
                self.require(2, opcode)?;
                let len = self.stacks.main.len();
                self.stacks.main.remove(len - 2);
            }
            OP_OVER => {
                self.require(2, opcode)?;
                let second = self.peek(2).clone();
                self.push(second);
            }
            OP_PICK | OP_ROLL => {
                let n = self.pop_num(opcode)?;
                if n < 0 || n as usize >= self.stacks.main.len() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let idx = self.stacks.main.len() - 1 - n as usize;
                let item = if opcode == OP_ROLL {
                    self.stacks.main.remove(idx)
                } else {
                    self.stacks.main[idx].clone()
                };
                self.push(item);
            }
            OP_ROT => {
                self.require(3, opcode)?;
                let len = self.stacks.main.len();
                let third = self.stacks.main.remove(len - 3);
                self.push(third);
            }
            OP_SWAP => {
                self.require(2, opcode)?;
                let len = self.stacks.main.len();
                self.stacks.main.swap(len - 2, len - 1);
            }
            OP_TUCK => {
                self.require(2, opcode)?;
                let len = self.stacks.main.len();
                let top = self.peek(1).clone();
                self.stacks.main.insert(len - 2, top);
            }
            OP_SIZE => {
                self.require(1, opcode)?;
                let size = self.peek(1).len() as i64;
                self.push(StackItem::from_num(size));
            }

            OP_EQUAL | OP_EQUALVERIFY => {
                let b = self.pop(opcode)?;
                let a = self.pop(opcode)?;
                let equal = a == b;
                if opcode == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::VerifyFailed(opcode));
                    }
                } else {
                    self.push(StackItem::from_bool(equal));
                }
            }

            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let n = self.pop_num(opcode)?;
                let result = match opcode {
                    OP_1ADD => n + 1,
                    OP_1SUB => n - 1,
                    OP_NEGATE => -n,
                    OP_ABS => n.abs(),
                    OP_NOT => (n == 0) as i64,
                    _ => (n != 0) as i64,
                };
                self.push(StackItem::from_num(result));
            }

            OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                self.require(2, opcode)?;
                let b = self.pop_num(opcode)?;
                let a = self.pop_num(opcode)?;
                let result = match opcode {
                    OP_ADD => a + b,
                    OP_SUB => a - b,
                    OP_BOOLAND => (a != 0 && b != 0) as i64,
                    OP_BOOLOR => (a != 0 || b != 0) as i64,
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => (a == b) as i64,
                    OP_NUMNOTEQUAL => (a != b) as i64,
                    OP_LESSTHAN => (a < b) as i64,
                    OP_GREATERTHAN => (a > b) as i64,
                    OP_LESSTHANOREQUAL => (a <= b) as i64,
                    OP_GREATERTHANOREQUAL => (a >= b) as i64,
                    OP_MIN => a.min(b),
                    _ => a.max(b),
                };
                if opcode == OP_NUMEQUALVERIFY {
                    if result == 0 {
                        return Err(ScriptError::VerifyFailed(opcode));
                    }
                } else {
                    self.push(StackItem::from_num(result));
                }
            }
            OP_WITHIN => {
                self.require(3, opcode)?;
                let max = self.pop_num(opcode)?;
                let min = self.pop_num(opcode)?;
                let x = self.pop_num(opcode)?;
                self.push(StackItem::from_bool(min <= x && x < max));
            }

            OP_RIPEMD160 | OP_SHA1 | OP_SHA256 | OP_HASH160 | OP_HASH256 => {
                let item = self.pop(opcode)?;
                let data = item.as_bytes();
                let digest = match opcode {
                    OP_RIPEMD160 => ripemd160(data).to_vec(),
                    OP_SHA1 => sha1_hash(data).to_vec(),
                    OP_SHA256 => sha256(data).to_vec(),
                    OP_HASH160 => hash160(data).to_vec(),
                    _ => sha256d(data).to_vec(),
                };
                self.push(StackItem::from_bytes(digest));
            }

            OP_CODESEPARATOR => {
                self.code_start = pc + 1;
            }

            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                self.require(2, opcode)?;
                let pubkey = self.pop(opcode)?;
                let signature = self.pop(opcode)?;
                let script_code = self.script_code(&[signature.as_bytes()]);
                let valid = self.checker.check_signature(
                    signature.as_bytes(),
                    pubkey.as_bytes(),
                    &script_code,
                );
                if opcode == OP_CHECKSIGVERIFY {
                    if !valid {
                        return Err(ScriptError::VerifyFailed(opcode));
                    }
                } else {
                    self.push(StackItem::from_bool(valid));
                }
            }

            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let valid = self.check_multisig(opcode)?;
                if opcode == OP_CHECKMULTISIGVERIFY {
                    if !valid {
                        return Err(ScriptError::VerifyFailed(opcode));
                    }
                } else {
                    self.push(StackItem::from_bool(valid));
                }
            }

            _ => return Err(ScriptError::BadOpcode(opcode)),
        }
        Ok(())
    }

    /// Stack layout, top last: dummy sig_1..sig_m m key_1..key_n n
    fn check_multisig(&mut self, opcode: u8) -> Result<bool, ScriptError> {
        let mut depth = 1;
        self.require(depth, opcode)?;

        let key_count = self.peek(depth).to_num()?;
        if key_count < 0 || key_count as usize > MAX_PUBKEYS_PER_MULTISIG {
            return Err(ScriptError::PubkeyCount(key_count));
        }
        let mut keys_left = key_count as usize;
        self.count_op(keys_left)?;
        depth += 1;
        let mut key_depth = depth;
        depth += keys_left;
        self.require(depth, opcode)?;

        let sig_count = self.peek(depth).to_num()?;
        if sig_count < 0 || sig_count > key_count {
            return Err(ScriptError::SigCount(sig_count));
        }
        let mut sigs_left = sig_count as usize;
        depth += 1;
        let mut sig_depth = depth;
        depth += sigs_left;
        // `depth` now also covers the extra item consumed by the historical off-by-one
        self.require(depth, opcode)?;

        let signatures: Vec<ByteString> = (0..sigs_left)
            .map(|i| self.peek(sig_depth + i).as_bytes().to_vec())
            .collect();
        let sig_refs: Vec<&[u8]> = signatures.iter().map(|s| s.as_slice()).collect();
        let script_code = self.script_code(&sig_refs);

        let mut success = true;
        while success && sigs_left > 0 {
            let signature = self.peek(sig_depth).as_bytes();
            let pubkey = self.peek(key_depth).as_bytes();
            if self.checker.check_signature(signature, pubkey, &script_code) {
                sig_depth += 1;
                sigs_left -= 1;
            }
            key_depth += 1;
            keys_left -= 1;
            if sigs_left > keys_left {
                success = false;
            }
        }

        let len = self.stacks.main.len();
        self.stacks.main.truncate(len - depth);
        Ok(success)
    }
}

/// Run one script against `stacks`
pub fn eval_script(
    script: &[u8],
    stacks: &mut ScriptStacks,
    checker: &dyn SignatureChecker,
    cancel: Option<&CancellationToken>,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize(script.len()));
    }
    let ops = parse_script(script)?;
    eval_operations(&ops, stacks, checker, cancel)
}

/// Run already decoded operations against `stacks`
pub fn eval_operations(
    ops: &[ScriptOperation],
    stacks: &mut ScriptStacks,
    checker: &dyn SignatureChecker,
    cancel: Option<&CancellationToken>,
) -> Result<(), ScriptError> {
    let mut interpreter = Interpreter {
        ops,
        stacks,
        checker,
        cancel,
        exec: Vec::new(),
        op_count: 0,
        code_start: 0,
    };
    interpreter.run()
}

/// VerifyScript: scriptSig on an empty stack, then scriptPubKey on the result.
///
/// `Ok(false)` means both scripts ran but the final stack is empty or false;
/// `Err` means evaluation aborted.
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    checker: &dyn SignatureChecker,
    cancel: Option<&CancellationToken>,
) -> Result<bool, ScriptError> {
    let mut stacks = ScriptStacks::new();
    eval_script(script_sig, &mut stacks, checker, cancel)?;
    eval_script(script_pubkey, &mut stacks, checker, cancel)?;
    Ok(stacks.top().map(StackItem::to_bool).unwrap_or(false))
}
