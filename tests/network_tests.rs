//! Tests for network payload decoding

use block_validation::network::*;
use block_validation::*;

fn command(name: &str) -> [u8; COMMAND_SIZE] {
    encode_command(name).unwrap()
}

fn sample_tx(seed: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint { hash: [seed; 32], index: seed as u32 },
            script_sig: vec![0x51],
            sequence: SEQUENCE_FINAL,
        }],
        outputs: vec![TransactionOutput {
            value: 1000 + seed as i64,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    }
}

#[test]
fn test_command_padding() {
    let cmd = command("getdata");
    assert_eq!(&cmd[..7], b"getdata");
    assert!(cmd[7..].iter().all(|b| *b == 0));
    assert_eq!(command_name(&cmd).unwrap(), "getdata");
}

#[test]
fn test_command_with_interior_nul_rejected() {
    let mut cmd = [0u8; COMMAND_SIZE];
    cmd[..2].copy_from_slice(b"tx");
    cmd[3] = b'x';
    assert!(matches!(decode_payload(&cmd, &[]), Err(ConsensusError::MalformedData(_))));
}

#[test]
fn test_command_non_printable_rejected() {
    let mut cmd = [0u8; COMMAND_SIZE];
    cmd[..3].copy_from_slice(&[b'i', 0x07, b'v']);
    assert!(matches!(command_name(&cmd), Err(ConsensusError::MalformedData(_))));
    assert!(encode_command("in v").is_err());
}

#[test]
fn test_process_inv_message() {
    let message = InvMessage {
        inventory: vec![InventoryVector::tx([1; 32]), InventoryVector::block([2; 32])],
    };
    let payload = encode_inv(&message);
    match decode_payload(&command("inv"), &payload).unwrap() {
        NetworkPayload::Inv(inv) => {
            assert_eq!(inv.inventory.len(), 2);
            assert!(inv.inventory[0].is_tx());
            assert!(inv.inventory[1].is_block());
            assert_eq!(inv.inventory[1].hash, [2; 32]);
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn test_empty_inv() {
    let decoded = decode_payload(&command("inv"), &[0x00]).unwrap();
    assert_eq!(decoded, NetworkPayload::Inv(InvMessage::default()));
}

#[test]
fn test_unknown_inventory_type_is_kept() {
    let message = InvMessage {
        inventory: vec![InventoryVector { inv_type: 0x4000_0001, hash: [3; 32] }],
    };
    let decoded = decode_payload(&command("getdata"), &encode_inv(&message)).unwrap();
    match decoded {
        NetworkPayload::GetData(getdata) => {
            assert!(!getdata.inventory[0].is_tx());
            assert!(!getdata.inventory[0].is_block());
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn test_large_inv_uses_three_byte_count() {
    let message = InvMessage {
        inventory: (0..300u32).map(|i| InventoryVector::tx([(i % 251) as u8; 32])).collect(),
    };
    let payload = encode_inv(&message);
    assert_eq!(payload[0], 0xfd);
    assert_eq!(payload.len(), 3 + 300 * 36);
    assert_eq!(
        decode_payload(&command("inv"), &payload).unwrap(),
        NetworkPayload::Inv(message)
    );
}

#[test]
fn test_inv_over_entry_limit_rejected() {
    // 50_001 entries claimed, nothing following
    let mut payload = vec![0xfd];
    payload.extend_from_slice(&((MAX_INV_ENTRIES as u16) + 1).to_le_bytes());
    assert!(matches!(
        decode_payload(&command("inv"), &payload),
        Err(ConsensusError::MalformedData(_))
    ));
}

#[test]
fn test_inv_trailing_bytes_rejected() {
    let mut payload = encode_inv(&InvMessage {
        inventory: vec![InventoryVector::tx([1; 32])],
    });
    payload.push(0);
    assert!(matches!(
        decode_payload(&command("inv"), &payload),
        Err(ConsensusError::MalformedData(_))
    ));
}

#[test]
fn test_non_canonical_count_rejected() {
    // one entry encoded with the three-byte form
    let mut payload = vec![0xfd, 0x01, 0x00];
    payload.extend_from_slice(&INV_TX.to_le_bytes());
    payload.extend_from_slice(&[9u8; 32]);
    assert!(matches!(
        decode_payload(&command("inv"), &payload),
        Err(ConsensusError::MalformedData(_))
    ));
}

#[test]
fn test_process_tx_message() {
    let tx = sample_tx(4);
    let payload = wire::serialize_transaction(&tx);
    let decoded = decode_payload(&command("tx"), &payload).unwrap();
    assert_eq!(decoded.command(), "tx");
    assert_eq!(decoded, NetworkPayload::Tx(tx));
}

#[test]
fn test_process_block_message() {
    let txs = vec![sample_tx(0), sample_tx(1), sample_tx(2)];
    let txids: Vec<Hash> = txs.iter().map(Transaction::id).collect();
    let block = Block {
        header: BlockHeader {
            version: 2,
            prev_block_hash: [5; 32],
            merkle_root: merkle::merkle_root(&txids).unwrap(),
            timestamp: 1_600_000_000,
            bits: GENESIS_BITS,
            nonce: 42,
        },
        transactions: txs,
    };
    let payload = wire::serialize_block(&block);
    match decode_payload(&command("block"), &payload).unwrap() {
        NetworkPayload::Block(decoded) => {
            assert_eq!(decoded.id(), block.id());
            assert_eq!(decoded, block);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    let mut trailing = payload;
    trailing.push(0xaa);
    assert!(matches!(
        decode_payload(&command("block"), &trailing),
        Err(ConsensusError::MalformedData(_))
    ));
}

#[test]
fn test_unsupported_commands() {
    for name in ["version", "verack", "ping", "addr", "headers"] {
        assert!(
            matches!(decode_payload(&command(name), &[]), Err(ConsensusError::Unsupported(_))),
            "{}",
            name
        );
    }
}

#[test]
fn test_facade_decode_payload() {
    let consensus = Consensus::new();
    let payload = encode_inv(&InvMessage {
        inventory: vec![InventoryVector::block([8; 32])],
    });
    assert_eq!(
        consensus.decode_payload(&command("getdata"), &payload).unwrap().command(),
        "getdata"
    );
}
