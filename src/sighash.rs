//! Transaction digests and ECDSA signature checking
//!
//! The digest committed to by a signature is the double SHA-256 of a modified copy
//! of the spending transaction followed by the 4-byte sighash type.

use crate::constants::*;
use crate::hashing::sha256d;
use crate::opcodes::OP_CODESEPARATOR;
use crate::script::{encode_script, ScriptOperation};
use crate::types::*;
use crate::wire::serialize_transaction;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, VerifyOnly};
use std::sync::Arc;

thread_local! {
    static SECP: Secp256k1<VerifyOnly> = Secp256k1::verification_only();
}

/// Digest signed when SIGHASH_SINGLE names an output that does not exist
const ONE_DIGEST: Hash = {
    let mut one = [0u8; 32];
    one[0] = 1;
    one
};

/// Answers OP_CHECKSIG queries for the script engine
pub trait SignatureChecker: Send + Sync {
    /// `signature` carries the sighash type as its last byte; `script_code` is the
    /// executing script from the last OP_CODESEPARATOR with signature pushes removed.
    fn check_signature(&self, signature: &[u8], pubkey: &[u8], script_code: &[ScriptOperation]) -> bool;
}

/// Checker for contexts without a spending transaction; every signature fails
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignatureChecker;

impl SignatureChecker for NoSignatureChecker {
    fn check_signature(&self, _signature: &[u8], _pubkey: &[u8], _script_code: &[ScriptOperation]) -> bool {
        false
    }
}

/// Checks signatures against input `input_index` of `tx`
#[derive(Debug, Clone)]
pub struct TransactionSignatureChecker {
    tx: Arc<Transaction>,
    input_index: usize,
}

impl TransactionSignatureChecker {
    pub fn new(tx: Arc<Transaction>, input_index: usize) -> Self {
        Self { tx, input_index }
    }
}

impl SignatureChecker for TransactionSignatureChecker {
    fn check_signature(&self, signature: &[u8], pubkey: &[u8], script_code: &[ScriptOperation]) -> bool {
        let (sighash_type, der) = match signature.split_last() {
            Some((last, der)) => (*last as u32, der),
            None => return false,
        };
        let digest = signature_hash(&self.tx, self.input_index, script_code, sighash_type);
        verify_ecdsa(der, pubkey, &digest)
    }
}

/// SignatureHash: digest of `tx` as seen by input `input_index` for `sighash_type`
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[ScriptOperation],
    sighash_type: u32,
) -> Hash {
    if input_index >= tx.inputs.len() {
        return ONE_DIGEST;
    }

    let code: Vec<ScriptOperation> = script_code
        .iter()
        .filter(|op| op.opcode != OP_CODESEPARATOR)
        .cloned()
        .collect();

    let mut copy = tx.clone();
    for input in copy.inputs.iter_mut() {
        input.script_sig.clear();
    }
    copy.inputs[input_index].script_sig = encode_script(&code);

    match sighash_type & 0x1f {
        SIGHASH_NONE => {
            copy.outputs.clear();
            zero_other_sequences(&mut copy, input_index);
        }
        SIGHASH_SINGLE => {
            if input_index >= copy.outputs.len() {
                return ONE_DIGEST;
            }
            copy.outputs.truncate(input_index + 1);
            for output in copy.outputs.iter_mut().take(input_index) {
                output.value = -1;
                output.script_pubkey.clear();
            }
            zero_other_sequences(&mut copy, input_index);
        }
        _ => {}
    }

    if sighash_type & SIGHASH_ANYONECANPAY != 0 {
        let signed = copy.inputs.swap_remove(input_index);
        copy.inputs = vec![signed];
    }

    let mut data = serialize_transaction(&copy);
    data.extend_from_slice(&sighash_type.to_le_bytes());
    sha256d(&data)
}

fn zero_other_sequences(tx: &mut Transaction, input_index: usize) {
    for (i, input) in tx.inputs.iter_mut().enumerate() {
        if i != input_index {
            input.sequence = 0;
        }
    }
}

/// Verify a DER signature over `digest`. High-S signatures are normalized first.
pub fn verify_ecdsa(der_signature: &[u8], pubkey: &[u8], digest: &Hash) -> bool {
    if der_signature.is_empty() {
        return false;
    }
    let pubkey = match PublicKey::from_slice(pubkey) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let mut signature = match Signature::from_der_lax(der_signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    signature.normalize_s();
    let message = match Message::from_digest_slice(digest) {
        Ok(msg) => msg,
        Err(_) => return false,
    };
    SECP.with(|secp| secp.verify_ecdsa(&message, &signature, &pubkey).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash160;
    use crate::opcodes::*;
    use crate::script::{parse_script, verify_script};
    use secp256k1::SecretKey;

    fn keypair(seed: u8) -> (SecretKey, Vec<u8>) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk.serialize().to_vec())
    }

    fn sign(sk: &SecretKey, digest: &Hash) -> Vec<u8> {
        let secp = Secp256k1::new();
        let msg = Message::from_digest_slice(digest).unwrap();
        secp.sign_ecdsa(&msg, sk).serialize_der().to_vec()
    }

    fn spending_tx(outputs: usize) -> Transaction {
        Transaction {
            version: 1,
            inputs: (0..2u8)
                .map(|i| TransactionInput {
                    prevout: OutPoint { hash: [i + 1; 32], index: i as u32 },
                    script_sig: vec![OP_1],
                    sequence: SEQUENCE_FINAL,
                })
                .collect(),
            outputs: (0..outputs)
                .map(|i| TransactionOutput {
                    value: 1000 * (i as i64 + 1),
                    script_pubkey: vec![OP_1, i as u8],
                })
                .collect(),
            lock_time: 0,
        }
    }

    fn p2pkh(pubkey: &[u8]) -> Vec<u8> {
        let mut script = vec![OP_DUP, OP_HASH160, 20];
        script.extend_from_slice(&hash160(pubkey));
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        script
    }

    // ===== ECDSA =====

    #[test]
    fn test_verify_ecdsa_accepts_valid_signature() {
        let (sk, pk) = keypair(0x11);
        let digest = sha256d(b"message");
        let sig = sign(&sk, &digest);
        assert!(verify_ecdsa(&sig, &pk, &digest));
    }

    #[test]
    fn test_verify_ecdsa_rejects_bit_flip() {
        let (sk, pk) = keypair(0x11);
        let mut digest = sha256d(b"message");
        let sig = sign(&sk, &digest);
        digest[0] ^= 0x01;
        assert!(!verify_ecdsa(&sig, &pk, &digest));
    }

    #[test]
    fn test_verify_ecdsa_rejects_flipped_signature_bit() {
        let (sk, pk) = keypair(0x11);
        let digest = sha256d(b"message");
        let mut sig = sign(&sk, &digest);
        assert!(verify_ecdsa(&sig, &pk, &digest));
        // low bit of s
        let last = sig.len() - 1;
        sig[last] ^= 0x01;
        assert!(!verify_ecdsa(&sig, &pk, &digest));
    }

    #[test]
    fn test_verify_ecdsa_rejects_wrong_key() {
        let (sk, _) = keypair(0x11);
        let (_, other) = keypair(0x22);
        let digest = sha256d(b"message");
        assert!(!verify_ecdsa(&sign(&sk, &digest), &other, &digest));
    }

    #[test]
    fn test_verify_ecdsa_malformed_inputs() {
        let (_, pk) = keypair(0x11);
        let digest = sha256d(b"message");
        assert!(!verify_ecdsa(&[], &pk, &digest));
        assert!(!verify_ecdsa(&[0x30, 0x01, 0x00], &pk, &digest));
        assert!(!verify_ecdsa(&[0x30; 70], &[0x02; 5], &digest));
    }

    // ===== Signature hash =====

    #[test]
    fn test_sighash_all_commits_to_outputs() {
        let tx = spending_tx(2);
        let code = parse_script(&[OP_CHECKSIG]).unwrap();
        let base = signature_hash(&tx, 0, &code, SIGHASH_ALL);

        let mut changed = tx.clone();
        changed.outputs[1].value += 1;
        assert_ne!(base, signature_hash(&changed, 0, &code, SIGHASH_ALL));

        // other inputs' scripts are blanked, so changing them does not matter
        let mut other_sig = tx.clone();
        other_sig.inputs[1].script_sig = vec![OP_2, OP_3];
        assert_eq!(base, signature_hash(&other_sig, 0, &code, SIGHASH_ALL));
    }

    #[test]
    fn test_sighash_none_ignores_outputs() {
        let tx = spending_tx(2);
        let code = parse_script(&[OP_CHECKSIG]).unwrap();
        let mut changed = tx.clone();
        changed.outputs[1].value += 1;
        changed.inputs[1].sequence = 7;
        assert_eq!(
            signature_hash(&tx, 0, &code, SIGHASH_NONE),
            signature_hash(&changed, 0, &code, SIGHASH_NONE)
        );
    }

    #[test]
    fn test_sighash_single() {
        let tx = spending_tx(2);
        let code = parse_script(&[OP_CHECKSIG]).unwrap();
        let base = signature_hash(&tx, 0, &code, SIGHASH_SINGLE);

        let mut later_output = tx.clone();
        later_output.outputs[1].value += 1;
        assert_eq!(base, signature_hash(&later_output, 0, &code, SIGHASH_SINGLE));

        let mut own_output = tx.clone();
        own_output.outputs[0].value += 1;
        assert_ne!(base, signature_hash(&own_output, 0, &code, SIGHASH_SINGLE));

        let one_output = spending_tx(1);
        assert_eq!(signature_hash(&one_output, 1, &code, SIGHASH_SINGLE), ONE_DIGEST);
    }

    #[test]
    fn test_sighash_anyonecanpay_ignores_other_inputs() {
        let tx = spending_tx(2);
        let code = parse_script(&[OP_CHECKSIG]).unwrap();
        let flags = SIGHASH_ALL | SIGHASH_ANYONECANPAY;
        let mut changed = tx.clone();
        changed.inputs[1].prevout.index = 99;
        assert_eq!(signature_hash(&tx, 0, &code, flags), signature_hash(&changed, 0, &code, flags));
        assert_ne!(signature_hash(&tx, 0, &code, flags), signature_hash(&tx, 0, &code, SIGHASH_ALL));
    }

    #[test]
    fn test_sighash_strips_codeseparators() {
        let tx = spending_tx(1);
        let plain = parse_script(&[OP_DUP, OP_CHECKSIG]).unwrap();
        let separated = parse_script(&[OP_DUP, OP_CODESEPARATOR, OP_CHECKSIG]).unwrap();
        assert_eq!(
            signature_hash(&tx, 0, &plain, SIGHASH_ALL),
            signature_hash(&tx, 0, &separated, SIGHASH_ALL)
        );
    }

    #[test]
    fn test_sighash_input_out_of_range() {
        let tx = spending_tx(1);
        assert_eq!(signature_hash(&tx, 5, &[], SIGHASH_ALL), ONE_DIGEST);
    }

    // ===== Checker =====

    #[test]
    fn test_p2pkh_spend_end_to_end() {
        let (sk, pk) = keypair(0x33);
        let script_pubkey = p2pkh(&pk);
        let mut tx = spending_tx(1);

        let code = parse_script(&script_pubkey).unwrap();
        let digest = signature_hash(&tx, 0, &code, SIGHASH_ALL);
        let mut sig = sign(&sk, &digest);
        sig.push(SIGHASH_ALL as u8);

        let mut script_sig = vec![sig.len() as u8];
        script_sig.extend_from_slice(&sig);
        script_sig.push(pk.len() as u8);
        script_sig.extend_from_slice(&pk);
        tx.inputs[0].script_sig = script_sig.clone();

        let checker = TransactionSignatureChecker::new(Arc::new(tx.clone()), 0);
        assert!(verify_script(&script_sig, &script_pubkey, &checker, None).unwrap());

        // the same signature does not authorize the second input
        let checker = TransactionSignatureChecker::new(Arc::new(tx.clone()), 1);
        assert!(!verify_script(&script_sig, &script_pubkey, &checker, None).unwrap());

        // nor a transaction paying someone else
        tx.outputs[0].value -= 1;
        let checker = TransactionSignatureChecker::new(Arc::new(tx), 0);
        assert!(!verify_script(&script_sig, &script_pubkey, &checker, None).unwrap());
    }

    #[test]
    fn test_empty_signature_fails() {
        let (_, pk) = keypair(0x33);
        let checker = TransactionSignatureChecker::new(Arc::new(spending_tx(1)), 0);
        assert!(!checker.check_signature(&[], &pk, &[]));
        assert!(!NoSignatureChecker.check_signature(&[1, 2], &pk, &[]));
    }
}
