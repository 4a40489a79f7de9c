// Block assembler
// Fee-ordered transaction selection, coinbase construction, header stamping

use chrono::Utc;
use tracing::debug;
use umbra_core::hashing::sha256;
use umbra_core::{Address, Amount, Block, BlockHeader, CoreError, SignedTransaction};
use umbra_farming::ProofOfStorage;
use umbra_tokenomics::{block_reward, estimate_fee_at_rate, DEFAULT_FEE_RATE_PER_BYTE};

/// Cap on non-coinbase transactions per block
pub const MAX_BLOCK_TRANSACTIONS: usize = 1000;

/// Builds blocks on top of a parent from mempool picks and a storage proof
#[derive(Clone, Debug)]
pub struct BlockAssembler {
    fee_rate: Amount,
}

impl Default for BlockAssembler {
    fn default() -> Self {
        BlockAssembler {
            fee_rate: DEFAULT_FEE_RATE_PER_BYTE,
        }
    }
}

impl BlockAssembler {
    pub fn new(fee_rate: Amount) -> Self {
        BlockAssembler { fee_rate }
    }

    pub fn fee_rate(&self) -> Amount {
        self.fee_rate
    }

    /// Assemble the next block: cap and fee-sort the candidates, prepend the
    /// coinbase paying `reward + fees`, compute the merkle root, stamp the
    /// header with the proof material.
    pub fn build_block(
        &self,
        parent: &Block,
        candidates: Vec<SignedTransaction>,
        proof: &ProofOfStorage,
        miner: Address,
    ) -> Result<Block, CoreError> {
        let height = parent.header.height + 1;

        let mut picked: Vec<(Amount, SignedTransaction)> = Vec::new();
        for tx in candidates.into_iter().take(MAX_BLOCK_TRANSACTIONS) {
            if tx.is_coinbase() {
                continue;
            }
            picked.push((estimate_fee_at_rate(&tx, self.fee_rate)?, tx));
        }
        picked.sort_by(|a, b| b.0.cmp(&a.0));

        let total_fees: Amount = picked.iter().map(|(fee, _)| fee).sum();
        let reward = block_reward(height);
        let coinbase = SignedTransaction::coinbase(miner, reward + total_fees, height)?;

        let mut transactions = Vec::with_capacity(picked.len() + 1);
        transactions.push(coinbase);
        transactions.extend(picked.into_iter().map(|(_, tx)| tx));

        let merkle_root = Block::compute_merkle_root(&transactions)?;
        let header = BlockHeader {
            version: 1,
            previous_block_hash: parent.hash(),
            merkle_root,
            timestamp: Utc::now(),
            height,
            nonce: 0,
            challenge_seed: hex::encode(&proof.challenge),
            proof_hash: hex::encode(sha256(proof.signature.as_bytes())),
            farmer_address: miner.encode(),
        };

        debug!(
            height,
            txs = transactions.len(),
            fees = total_fees,
            reward,
            "assembled block"
        );
        Ok(Block::new(header, transactions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::create_genesis_block;
    use umbra_core::{Keypair, Seed, Transaction, TxInput, TxOutput, SEED_SIZE};

    fn storage_proof() -> ProofOfStorage {
        let keypair = Keypair::from_seed(&Seed::from_bytes([5u8; SEED_SIZE]));
        let challenge = b"assembler challenge".to_vec();
        let signature = keypair.sign(&challenge).unwrap();
        ProofOfStorage {
            challenge,
            plot_path: "plot.dat".into(),
            offset: 0,
            identifier: keypair.public_key().identifier(),
            public_key: keypair.public_key(),
            signature,
        }
    }

    fn signed_tx(nonce: u64, extra_outputs: usize) -> SignedTransaction {
        let keypair = Keypair::from_seed(&Seed::from_bytes([6u8; SEED_SIZE]));
        let now = Utc::now();
        let outputs = (0..=extra_outputs)
            .map(|i| TxOutput {
                value: 100 + i as Amount,
                script_pub_key: String::new(),
                address: Address::from_public_key(b"dest"),
            })
            .collect();
        let tx = Transaction::new(
            1,
            vec![TxInput {
                previous_tx_hash: format!("{nonce:064x}"),
                output_index: 0,
                script_sig: String::new(),
                sequence: 0,
            }],
            outputs,
            now,
            now,
            nonce,
        );
        SignedTransaction::sign(&tx, &keypair).unwrap()
    }

    #[test]
    fn test_coinbase_first_with_reward_plus_fees() {
        let parent = create_genesis_block().unwrap();
        let assembler = BlockAssembler::default();
        let miner = Address::from_public_key(b"miner");
        let picks = vec![signed_tx(1, 0), signed_tx(2, 0)];
        let expected_fees: Amount = picks
            .iter()
            .map(|tx| estimate_fee_at_rate(tx, assembler.fee_rate()).unwrap())
            .sum();

        let block = assembler
            .build_block(&parent, picks, &storage_proof(), miner)
            .unwrap();

        assert_eq!(block.header.height, 1);
        assert_eq!(block.body.tx_count, 3);
        assert!(block.body.transactions[0].is_coinbase());
        assert!(!block.body.transactions[1].is_coinbase());

        let coinbase = block.body.transactions[0].verify().unwrap();
        assert_eq!(
            coinbase.outputs[0].value,
            block_reward(1) + expected_fees
        );
        assert_eq!(coinbase.outputs[0].address, miner);
    }

    #[test]
    fn test_candidates_sorted_by_fee_descending() {
        let parent = create_genesis_block().unwrap();
        let assembler = BlockAssembler::default();

        // More outputs, larger canonical form, larger fee
        let small = signed_tx(1, 0);
        let large = signed_tx(2, 3);
        let block = assembler
            .build_block(
                &parent,
                vec![small.clone(), large.clone()],
                &storage_proof(),
                Address::from_public_key(b"miner"),
            )
            .unwrap();

        assert_eq!(block.body.transactions[1].tx_hash, large.tx_hash);
        assert_eq!(block.body.transactions[2].tx_hash, small.tx_hash);
    }

    #[test]
    fn test_header_carries_proof_material() {
        let parent = create_genesis_block().unwrap();
        let proof = storage_proof();
        let block = BlockAssembler::default()
            .build_block(&parent, vec![], &proof, Address::from_public_key(b"miner"))
            .unwrap();

        assert_eq!(block.header.previous_block_hash, parent.hash());
        assert_eq!(block.header.challenge_seed, hex::encode(&proof.challenge));
        assert_eq!(
            block.header.proof_hash,
            hex::encode(sha256(proof.signature.as_bytes()))
        );
        assert_eq!(
            block.header.merkle_root,
            Block::compute_merkle_root(&block.body.transactions).unwrap()
        );
    }

    #[test]
    fn test_stray_coinbase_candidates_dropped() {
        let parent = create_genesis_block().unwrap();
        let stray =
            SignedTransaction::coinbase(Address::from_public_key(b"x"), 5, 1).unwrap();
        let block = BlockAssembler::default()
            .build_block(
                &parent,
                vec![stray],
                &storage_proof(),
                Address::from_public_key(b"miner"),
            )
            .unwrap();

        assert_eq!(block.body.tx_count, 1);
        assert!(block.body.transactions[0].is_coinbase());
    }
}
