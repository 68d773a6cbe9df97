//! Block validation pipeline
//!
//! A block moves through [`ValidationStage`]s:
//! 1. Parsed: the payload decodes while the previous block is looked up
//! 2. PowChecked: the header id is below its target
//! 3. MerkleChecked: the header commits to the transaction ids
//! 4. InputsResolved: every spent output is found in the block or the store
//! 5. ScriptsVerified: every non-coinbase input's scripts succeed
//! 6. Accepted: transactions, block and height are persisted
//!
//! Any failure moves it to Rejected. Nothing is written unless the whole block passes.

use crate::config::ValidatorConfig;
use crate::error::{ConsensusError, Result, ScriptError};
use crate::height_index::HeightIndex;
use crate::merkle::merkle_root;
use crate::pow::check_proof_of_work;
use crate::script::{decode_num, parse_script, verify_script};
use crate::sighash::TransactionSignatureChecker;
use crate::store::{ChainItem, ChainStore};
use crate::transaction::check_transaction;
use crate::types::*;
use crate::wire::{self, Reader};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Progress of a block through validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationStage {
    Parsed,
    PowChecked,
    MerkleChecked,
    InputsResolved,
    ScriptsVerified,
    Accepted,
    Rejected,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationStage::Parsed => "parsed",
            ValidationStage::PowChecked => "pow-checked",
            ValidationStage::MerkleChecked => "merkle-checked",
            ValidationStage::InputsResolved => "inputs-resolved",
            ValidationStage::ScriptsVerified => "scripts-verified",
            ValidationStage::Accepted => "accepted",
            ValidationStage::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

impl From<ConsensusError> for BlockValidationResult {
    fn from(err: ConsensusError) -> Self {
        match err {
            ConsensusError::MalformedData(msg) => BlockValidationResult::MessageInvalid(msg),
            ConsensusError::Cancelled | ConsensusError::Script(ScriptError::Cancelled) => {
                BlockValidationResult::Cancelled
            }
            ConsensusError::ContextuallyInvalid(msg) => BlockValidationResult::ContextuallyInvalid(msg),
            other => BlockValidationResult::ContextuallyInvalid(other.to_string()),
        }
    }
}

/// Verdict together with how far validation got
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub result: BlockValidationResult,
    /// Last stage reached; `Rejected` when a rule failed before `Parsed`
    pub stage: ValidationStage,
    pub block_id: Option<Hash>,
    pub height: Option<u64>,
}

#[derive(Debug)]
struct Progress {
    stage: Option<ValidationStage>,
    block_id: Option<Hash>,
    height: Option<u64>,
}

impl Progress {
    fn new() -> Self {
        Self {
            stage: None,
            block_id: None,
            height: None,
        }
    }

    fn advance(&mut self, stage: ValidationStage) {
        debug!(%stage, "validation stage reached");
        self.stage = Some(stage);
    }

    fn finish(self, outcome: Result<()>) -> ValidationReport {
        let (result, stage) = match outcome {
            Ok(()) => (BlockValidationResult::Okay, ValidationStage::Accepted),
            Err(err) => {
                let result = BlockValidationResult::from(err);
                let stage = self.stage.unwrap_or(ValidationStage::Rejected);
                match &result {
                    BlockValidationResult::Cancelled => info!(%stage, "validation cancelled"),
                    other => warn!(%stage, verdict = ?other, "block rejected"),
                }
                (result, stage)
            }
        };
        ValidationReport {
            result,
            stage,
            block_id: self.block_id,
            height: self.height,
        }
    }
}

/// An input paired with the output it spends
#[derive(Debug, Clone)]
struct ResolvedInput {
    tx: Arc<Transaction>,
    tx_index: usize,
    input_index: usize,
    spent: TransactionOutput,
}

fn join_error(err: JoinError) -> ConsensusError {
    if err.is_cancelled() {
        ConsensusError::Cancelled
    } else {
        ConsensusError::Internal(format!("validation task failed: {}", err))
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ConsensusError::Cancelled);
    }
    Ok(())
}

/// Height claimed by the first push of a coinbase script, if it is a number
fn coinbase_height(coinbase: &Transaction) -> Option<i64> {
    let script_sig = &coinbase.inputs.first()?.script_sig;
    let first = parse_script(script_sig).ok()?.into_iter().next()?;
    match first.data {
        Some(data) => decode_num(&data, 8).ok(),
        None => crate::opcodes::small_int_value(first.opcode),
    }
}

fn verify_input(input: &ResolvedInput, cancel: &CancellationToken) -> Result<()> {
    let checker = TransactionSignatureChecker::new(Arc::clone(&input.tx), input.input_index);
    let script_sig = &input.tx.inputs[input.input_index].script_sig;
    match verify_script(script_sig, &input.spent.script_pubkey, &checker, Some(cancel)) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ConsensusError::ContextuallyInvalid(format!(
            "script of transaction {} input {} evaluated to false",
            input.tx_index, input.input_index
        ))),
        Err(ScriptError::Cancelled) => Err(ConsensusError::Cancelled),
        Err(err) => Err(ConsensusError::ContextuallyInvalid(format!(
            "script of transaction {} input {} failed: {}",
            input.tx_index, input.input_index, err
        ))),
    }
}

/// Validates blocks and standalone transactions against a chain store
pub struct BlockValidator {
    store: Arc<dyn ChainStore>,
    heights: Arc<dyn HeightIndex>,
    config: ValidatorConfig,
}

impl BlockValidator {
    pub fn new(store: Arc<dyn ChainStore>, heights: Arc<dyn HeightIndex>, config: ValidatorConfig) -> Self {
        Self { store, heights, config }
    }

    pub fn with_defaults(store: Arc<dyn ChainStore>, heights: Arc<dyn HeightIndex>) -> Self {
        Self::new(store, heights, ValidatorConfig::default())
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    pub fn heights(&self) -> &Arc<dyn HeightIndex> {
        &self.heights
    }

    /// Validate a serialized block and persist it on success
    pub async fn validate(&self, bytes: &[u8], cancel: &CancellationToken) -> BlockValidationResult {
        self.validate_with_report(bytes, cancel).await.result
    }

    pub async fn validate_with_report(&self, bytes: &[u8], cancel: &CancellationToken) -> ValidationReport {
        let span = info_span!("validate_block", size = bytes.len());
        async {
            let mut progress = Progress::new();
            let outcome = self.run_bytes(bytes, cancel, &mut progress).await;
            progress.finish(outcome)
        }
        .instrument(span)
        .await
    }

    /// Validate an already decoded block and persist it on success
    pub async fn validate_block(&self, block: Block, cancel: &CancellationToken) -> BlockValidationResult {
        let span = info_span!("validate_block", block = %display_hash(&block.id()));
        async {
            let mut progress = Progress::new();
            let outcome = async {
                check_cancelled(cancel)?;
                let height = self.height_for(&block.header, cancel).await?;
                progress.advance(ValidationStage::Parsed);
                self.run_block(Arc::new(block), height, cancel, &mut progress).await
            }
            .await;
            progress.finish(outcome).result
        }
        .instrument(span)
        .await
    }

    /// Validate a standalone `tx` payload against the store and persist it on success
    pub async fn validate_transaction_bytes(&self, bytes: &[u8], cancel: &CancellationToken) -> BlockValidationResult {
        let span = info_span!("validate_transaction", size = bytes.len());
        async {
            let outcome = self.run_transaction(bytes, cancel).await;
            match outcome {
                Ok(()) => BlockValidationResult::Okay,
                Err(err) => {
                    let result = BlockValidationResult::from(err);
                    warn!(verdict = ?result, "transaction rejected");
                    result
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_bytes(&self, bytes: &[u8], cancel: &CancellationToken, progress: &mut Progress) -> Result<()> {
        check_cancelled(cancel)?;
        if bytes.len() > self.config.max_block_size {
            return Err(ConsensusError::MalformedData(format!(
                "block of {} bytes exceeds {}",
                bytes.len(),
                self.config.max_block_size
            )));
        }

        // the header alone names the previous block, so the lookup can start
        // while the transactions are still being decoded
        let header = Reader::new(bytes).read_block_header()?;
        let owned = bytes.to_vec();
        let (decoded, previous) = tokio::join!(
            tokio::task::spawn_blocking(move || wire::decode_block(&owned)),
            self.height_for(&header, cancel),
        );
        let block = decoded.map_err(join_error)??;
        let height = previous?;
        progress.advance(ValidationStage::Parsed);

        self.run_block(Arc::new(block), height, cancel, progress).await
    }

    /// Height of a block with `header`: 0 for genesis, otherwise one above its
    /// stored, indexed predecessor
    async fn height_for(&self, header: &BlockHeader, cancel: &CancellationToken) -> Result<u64> {
        if header.is_genesis() {
            return Ok(0);
        }
        let previous = &header.prev_block_hash;
        match self.store.try_get_async(previous, cancel).await? {
            Some(ChainItem::Block(_)) => {}
            _ => {
                return Err(ConsensusError::ContextuallyInvalid(format!(
                    "previous block {} is unknown",
                    display_hash(previous)
                )))
            }
        }
        let parent = self.heights.height_of(previous).ok_or_else(|| {
            ConsensusError::ContextuallyInvalid(format!(
                "previous block {} has no recorded height",
                display_hash(previous)
            ))
        })?;
        Ok(parent + 1)
    }

    async fn run_block(
        &self,
        block: Arc<Block>,
        height: u64,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<()> {
        let block_id = block.id();
        progress.block_id = Some(block_id);
        progress.height = Some(height);
        debug!(block = %display_hash(&block_id), height, txs = block.transactions.len(), "decoded block");

        self.fast_reject(&block)?;

        if !check_proof_of_work(&block.header)? {
            return Err(ConsensusError::ContextuallyInvalid(format!(
                "block hash {} is above its target",
                display_hash(&block_id)
            )));
        }
        progress.advance(ValidationStage::PowChecked);

        check_block_structure(&block)?;
        let txids: Vec<Hash> = block.transactions.iter().map(Transaction::id).collect();
        let root = merkle_root(&txids)?;
        if root != block.header.merkle_root {
            return Err(ConsensusError::ContextuallyInvalid(format!(
                "merkle root mismatch: header {} computed {}",
                display_hash(&block.header.merkle_root),
                display_hash(&root)
            )));
        }
        progress.advance(ValidationStage::MerkleChecked);

        let txs: Vec<Arc<Transaction>> = block.transactions.iter().cloned().map(Arc::new).collect();
        let resolved = self.resolve_inputs(&txs, &txids, cancel).await?;
        progress.advance(ValidationStage::InputsResolved);

        self.verify_inputs(resolved, cancel).await?;
        progress.advance(ValidationStage::ScriptsVerified);

        check_cancelled(cancel)?;
        let mut items: Vec<ChainItem> = txs.iter().map(|tx| ChainItem::Transaction(Arc::clone(tx))).collect();
        items.push(ChainItem::Block(Arc::clone(&block)));
        self.commit(items).await?;
        self.heights.record(block_id, height)?;
        progress.advance(ValidationStage::Accepted);
        info!(block = %display_hash(&block_id), height, txs = txs.len(), "block accepted");
        Ok(())
    }

    /// Persist accepted items. Cancellation is no longer observed here: once
    /// the first write lands the rest must follow.
    async fn commit(&self, items: Vec<ChainItem>) -> Result<()> {
        let detached = CancellationToken::new();
        for item in items {
            self.store.put_async(item, &detached).await?;
        }
        Ok(())
    }

    /// Reject a coinbase claiming a height far above the known tip
    fn fast_reject(&self, block: &Block) -> Result<()> {
        let lead = match self.config.max_height_lead {
            Some(lead) => lead,
            None => return Ok(()),
        };
        if block.header.is_genesis() {
            return Ok(());
        }
        let (tip, claimed) = match (self.heights.tip(), block.coinbase().and_then(coinbase_height)) {
            (Some((_, tip)), Some(claimed)) => (tip, claimed),
            _ => return Ok(()),
        };
        if claimed > 0 && claimed as u64 > tip.saturating_add(lead) {
            return Err(ConsensusError::ContextuallyInvalid(format!(
                "coinbase height {} is more than {} above tip {}",
                claimed, lead, tip
            )));
        }
        Ok(())
    }

    async fn run_transaction(&self, bytes: &[u8], cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        let tx = wire::decode_transaction(bytes)?;
        check_transaction(&tx)?;
        if tx.is_coinbase() {
            return Err(ConsensusError::ContextuallyInvalid(
                "coinbase transaction outside a block".to_string(),
            ));
        }
        let txid = tx.id();
        let txs = vec![Arc::new(tx)];
        let resolved = self.resolve_inputs(&txs, &[txid], cancel).await?;
        self.verify_inputs(resolved, cancel).await?;
        check_cancelled(cancel)?;
        self.commit(vec![ChainItem::Transaction(Arc::clone(&txs[0]))]).await?;
        info!(tx = %display_hash(&txid), "transaction accepted");
        Ok(())
    }

    /// Pair every input with the output it spends.
    ///
    /// Outputs of earlier transactions in `txs` are used directly; all other
    /// referenced transactions are requested from the store in one batch.
    async fn resolve_inputs(
        &self,
        txs: &[Arc<Transaction>],
        txids: &[Hash],
        cancel: &CancellationToken,
    ) -> Result<Vec<ResolvedInput>> {
        let mut earlier: HashMap<Hash, usize> = HashMap::new();
        let mut spent: HashSet<OutPoint> = HashSet::new();
        let mut wanted: Vec<Hash> = Vec::new();
        let mut wanted_set: HashSet<Hash> = HashSet::new();

        for (tx_index, tx) in txs.iter().enumerate() {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    if !spent.insert(input.prevout) {
                        return Err(ConsensusError::ContextuallyInvalid(format!(
                            "outpoint {} spent twice in one block",
                            input.prevout
                        )));
                    }
                    let hash = input.prevout.hash;
                    if !earlier.contains_key(&hash) && wanted_set.insert(hash) {
                        wanted.push(hash);
                    }
                }
            }
            earlier.entry(txids[tx_index]).or_insert(tx_index);
        }

        let lookups = wanted.iter().map(|id| self.store.try_get_async(id, cancel));
        let results = join_all(lookups).await;
        let mut fetched: HashMap<Hash, Arc<Transaction>> = HashMap::with_capacity(wanted.len());
        for (id, result) in wanted.iter().zip(results) {
            if let Some(ChainItem::Transaction(tx)) = result? {
                fetched.insert(*id, tx);
            }
        }
        debug!(external = wanted.len(), found = fetched.len(), "resolved previous transactions");

        let mut resolved = Vec::new();
        for (tx_index, tx) in txs.iter().enumerate() {
            if tx.is_coinbase() {
                // spends newly created value: its synthetic output is the sum of its outputs
                let total = tx.total_output_value().ok_or_else(|| {
                    ConsensusError::ContextuallyInvalid("coinbase output values overflow".to_string())
                })?;
                resolved.push(ResolvedInput {
                    tx: Arc::clone(tx),
                    tx_index,
                    input_index: 0,
                    spent: TransactionOutput {
                        value: total,
                        script_pubkey: Vec::new(),
                    },
                });
                continue;
            }
            for (input_index, input) in tx.inputs.iter().enumerate() {
                let prevout = &input.prevout;
                let source = match earlier.get(&prevout.hash) {
                    Some(&source_index) if source_index < tx_index => Some(&txs[source_index]),
                    _ => fetched.get(&prevout.hash),
                };
                let source = source.ok_or_else(|| {
                    ConsensusError::ContextuallyInvalid(format!(
                        "transaction {} input {} spends unknown transaction {}",
                        tx_index,
                        input_index,
                        display_hash(&prevout.hash)
                    ))
                })?;
                let output = source.outputs.get(prevout.index as usize).ok_or_else(|| {
                    ConsensusError::ContextuallyInvalid(format!(
                        "transaction {} input {} spends missing output {}",
                        tx_index, input_index, prevout
                    ))
                })?;
                resolved.push(ResolvedInput {
                    tx: Arc::clone(tx),
                    tx_index,
                    input_index,
                    spent: output.clone(),
                });
            }
        }
        Ok(resolved)
    }

    /// Run scripts for every non-coinbase input on blocking workers.
    ///
    /// The first failure cancels a child token that the remaining workers poll.
    async fn verify_inputs(&self, resolved: Vec<ResolvedInput>, cancel: &CancellationToken) -> Result<()> {
        let inputs: Vec<ResolvedInput> = resolved.into_iter().filter(|r| !r.tx.is_coinbase()).collect();
        if inputs.is_empty() {
            return Ok(());
        }
        check_cancelled(cancel)?;
        let child = cancel.child_token();

        if !self.config.parallel_scripts {
            let token = child.clone();
            return tokio::task::spawn_blocking(move || {
                inputs.iter().try_for_each(|input| verify_input(input, &token))
            })
            .await
            .map_err(join_error)?;
        }

        let count = inputs.len();
        let mut workers = JoinSet::new();
        for input in inputs {
            let token = child.clone();
            workers.spawn_blocking(move || verify_input(&input, &token));
        }

        let mut first_failure: Option<ConsensusError> = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(join_error).and_then(|r| r);
            if let Err(err) = outcome {
                if first_failure.is_none() {
                    child.cancel();
                    first_failure = Some(err);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(ConsensusError::Cancelled);
        }
        match first_failure {
            Some(err) => Err(err),
            None => {
                debug!(inputs = count, "input scripts verified");
                Ok(())
            }
        }
    }
}

/// At least one transaction; the first is the only coinbase; each passes CheckTransaction
fn check_block_structure(block: &Block) -> Result<()> {
    let first = block.transactions.first().ok_or_else(|| {
        ConsensusError::ContextuallyInvalid("block has no transactions".to_string())
    })?;
    if !first.is_coinbase() {
        return Err(ConsensusError::ContextuallyInvalid(
            "first transaction is not a coinbase".to_string(),
        ));
    }
    if let Some(index) = block.transactions.iter().skip(1).position(Transaction::is_coinbase) {
        return Err(ConsensusError::ContextuallyInvalid(format!(
            "transaction {} is a second coinbase",
            index + 1
        )));
    }
    for tx in &block.transactions {
        check_transaction(tx)?;
    }
    Ok(())
}
