//! Signature hash vectors and invariants across signature versions

use chain_proof::constants::TAPROOT_LEAF_TAPSCRIPT;
use chain_proof::crypto::double_sha256;
use chain_proof::script::{p2pkh_script, p2tr_script, p2wpkh_script};
use chain_proof::serialization::ByteReader;
use chain_proof::sighash::{hash_for_signature, serialize_for_signature};
use chain_proof::taproot::{annex_hash, tap_leaf_hash};
use chain_proof::{
    ChainError, Hash, HashType, OutPoint, SigVersion, TaprootSigHashOptions, Transaction, TransactionInput,
    TransactionOutput, Witness, ERROR_HASH,
};
use proptest::prelude::*;

const BIP143_UNSIGNED_TX: &str = "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000";

const BIP143_PREIMAGE: &str = "0100000096b827c8483d4e9b96712b6713a7b68d6e8003a781feba36c31143470b4efd3752b0a642eea2fb7ae638c36f6252b6750293dbe574a806984b8e4d8548339a3bef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a010000001976a9141d0f172a0ecb48aee1be1f2687d2963ae33f71a188ac0046c32300000000ffffffff863ef3e1a92afbfdb97f31ad0fc7683ee943e9abcf2501590ff8f6551f47e5e51100000001000000";

const BIP143_SIGHASH: &str = "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670";

fn bip143_funding_output() -> TransactionOutput {
    TransactionOutput {
        value: 600_000_000,
        script_pubkey: hex::decode("00141d0f172a0ecb48aee1be1f2687d2963ae33f71a1").unwrap(),
    }
}

fn input(seed: u8) -> TransactionInput {
    TransactionInput {
        prevout: OutPoint::new([seed; 32], seed as u32),
        script_sig: vec![],
        sequence: 0xffff_fffe,
    }
}

fn output(value: i64) -> TransactionOutput {
    TransactionOutput {
        value,
        script_pubkey: p2pkh_script(&[0x11; 20]),
    }
}

fn sample_tx() -> Transaction {
    Transaction {
        version: 2,
        inputs: vec![input(1), input(2), input(3)],
        outputs: vec![output(10_000), output(20_000), output(30_000)],
        lock_time: 0,
        witnesses: vec![],
    }
}

fn digest(tx: &Transaction, index: usize, funding: &[TransactionOutput], hash_type: HashType, version: SigVersion) -> Hash {
    hash_for_signature(tx, index, funding, hash_type, version, &TaprootSigHashOptions::default()).unwrap()
}

#[test]
fn test_bip143_native_p2wpkh_preimage() {
    let tx = Transaction::parse(&hex::decode(BIP143_UNSIGNED_TX).unwrap()).unwrap();
    let preimage = serialize_for_signature(
        &tx,
        1,
        &[bip143_funding_output()],
        HashType::ALL,
        SigVersion::WitnessV0,
        &TaprootSigHashOptions::default(),
    )
    .unwrap();
    assert_eq!(hex::encode(&preimage), BIP143_PREIMAGE);
}

#[test]
fn test_bip143_native_p2wpkh_sighash() {
    let tx = Transaction::parse(&hex::decode(BIP143_UNSIGNED_TX).unwrap()).unwrap();
    let funding = bip143_funding_output();
    let sig_version = SigVersion::for_spend(&funding.script_pubkey, &tx.inputs[1].script_sig, &Witness::empty());
    assert_eq!(sig_version, SigVersion::WitnessV0);

    let sighash = digest(&tx, 1, &[funding], HashType::ALL, sig_version);
    assert_eq!(hex::encode(sighash), BIP143_SIGHASH);
    assert_eq!(sighash, double_sha256(&hex::decode(BIP143_PREIMAGE).unwrap()));
}

#[test]
fn test_witness_v0_all_commits_to_every_output() {
    let tx = sample_tx();
    let funding = [TransactionOutput {
        value: 50_000,
        script_pubkey: p2wpkh_script(&[0x02; 33]),
    }];
    let base = digest(&tx, 1, &funding, HashType::ALL, SigVersion::WitnessV0);

    for i in 0..tx.outputs.len() {
        let mut changed = tx.clone();
        changed.outputs[i].value += 1;
        assert_ne!(digest(&changed, 1, &funding, HashType::ALL, SigVersion::WitnessV0), base, "output {i}");
    }
}

#[test]
fn test_witness_v0_ignores_script_sigs() {
    let tx = sample_tx();
    let funding = [TransactionOutput {
        value: 50_000,
        script_pubkey: p2wpkh_script(&[0x02; 33]),
    }];
    let base = digest(&tx, 0, &funding, HashType::ALL, SigVersion::WitnessV0);

    let mut changed = tx.clone();
    changed.inputs[0].script_sig = vec![0x51];
    changed.inputs[2].script_sig = vec![0x52, 0x53];
    assert_eq!(digest(&changed, 0, &funding, HashType::ALL, SigVersion::WitnessV0), base);
}

#[test]
fn test_witness_v0_none_and_anyonecanpay() {
    let tx = sample_tx();
    let funding = [TransactionOutput {
        value: 50_000,
        script_pubkey: p2wpkh_script(&[0x02; 33]),
    }];

    let none = digest(&tx, 0, &funding, HashType::NONE, SigVersion::WitnessV0);
    let mut outputs_changed = tx.clone();
    outputs_changed.outputs.truncate(1);
    assert_eq!(digest(&outputs_changed, 0, &funding, HashType::NONE, SigVersion::WitnessV0), none);

    let acp = digest(&tx, 0, &funding, HashType::ALL_ANYONECANPAY, SigVersion::WitnessV0);
    let mut others_changed = tx.clone();
    others_changed.inputs[1].prevout.index = 99;
    others_changed.inputs[2].sequence = 0;
    assert_eq!(
        digest(&others_changed, 0, &funding, HashType::ALL_ANYONECANPAY, SigVersion::WitnessV0),
        acp
    );
    assert_ne!(
        digest(&others_changed, 0, &funding, HashType::ALL, SigVersion::WitnessV0),
        digest(&tx, 0, &funding, HashType::ALL, SigVersion::WitnessV0)
    );
}

#[test]
fn test_witness_v0_input_index_out_of_range() {
    let tx = sample_tx();
    let funding = [TransactionOutput {
        value: 50_000,
        script_pubkey: p2wpkh_script(&[0x02; 33]),
    }];
    let result = hash_for_signature(
        &tx,
        3,
        &funding,
        HashType::ALL,
        SigVersion::WitnessV0,
        &TaprootSigHashOptions::default(),
    );
    assert!(matches!(result, Err(ChainError::InvalidInputIndex { index: 3, inputs: 3 })));
}

#[test]
fn test_legacy_ignores_other_script_sigs() {
    let tx = sample_tx();
    let funding = [output(50_000)];
    let base = digest(&tx, 0, &funding, HashType::ALL, SigVersion::Base);

    let mut changed = tx.clone();
    changed.inputs[0].script_sig = vec![0x51];
    changed.inputs[1].script_sig = vec![0x52];
    assert_eq!(digest(&changed, 0, &funding, HashType::ALL, SigVersion::Base), base);
}

#[test]
fn test_taproot_key_path_commits_to_all_amounts() {
    let tx = sample_tx();
    let funding: Vec<TransactionOutput> = (0..3)
        .map(|i| TransactionOutput {
            value: 40_000 + i,
            script_pubkey: p2tr_script(&[0x33; 32]),
        })
        .collect();
    let base = digest(&tx, 0, &funding, HashType::Default, SigVersion::TaprootKeyPath);

    let mut other_amount = funding.clone();
    other_amount[2].value += 1;
    assert_ne!(digest(&tx, 0, &other_amount, HashType::Default, SigVersion::TaprootKeyPath), base);

    // ANYONECANPAY only commits to its own prevout
    let acp = digest(&tx, 0, &funding, HashType::ALL_ANYONECANPAY, SigVersion::TaprootKeyPath);
    assert_eq!(
        digest(&tx, 0, &other_amount, HashType::ALL_ANYONECANPAY, SigVersion::TaprootKeyPath),
        acp
    );
}

#[test]
fn test_taproot_rejects_invalid_hash_type_and_prevout_count() {
    let tx = sample_tx();
    let funding: Vec<TransactionOutput> = (0..3)
        .map(|_| TransactionOutput {
            value: 40_000,
            script_pubkey: p2tr_script(&[0x33; 32]),
        })
        .collect();
    let options = TaprootSigHashOptions::default();

    let bad_type = hash_for_signature(&tx, 0, &funding, HashType::from_u32(0x04), SigVersion::TaprootKeyPath, &options);
    assert!(matches!(bad_type, Err(ChainError::InvalidHashType(0x04))));

    let short = hash_for_signature(&tx, 0, &funding[..2], HashType::ALL, SigVersion::TaprootKeyPath, &options);
    assert!(matches!(
        short,
        Err(ChainError::PrevoutCountMismatch { expected: 3, found: 2 })
    ));
}

/// Known-answer taproot signature hashes from the Bitcoin Core functional
/// test framework: transaction, spent outputs, input index, hash type, digest
struct TaprootVector {
    tx: &'static str,
    prevouts: &'static str,
    index: usize,
    hash_type: u32,
    sighash: &'static str,
}

const TAPROOT_KEY_PATH_VECTORS: &[TaprootVector] = &[
    TaprootVector {
        tx: "020000000164eb050a5e3da0c2a65e4786f26d753b7bc69691fabccafb11f7acef36641f1846010000003101b2b404392a22000000000017a9147f2bde86fe78bf68a0544a4f290e12f0b7e0a08c87580200000000000017a91425d11723074ecfb96a0a83c3956bfaf362ae0c908758020000000000001600147e20f938993641de67bb0cdd71682aa34c4d29ad5802000000000000160014c64984dc8761acfa99418bd6bedc79b9287d652d72000000",
        prevouts: "01365724000000000023542156b39dab4f8f3508e0432cfb41fab110170acaa2d4c42539cb90a4dc7c093bc500",
        index: 0,
        hash_type: 0x00,
        sighash: "33ca0ebfb4a945eeee9569fc0f5040221275f88690b7f8592ada88ce3bdf6703",
    },
    TaprootVector {
        tx: "0200000002fff49be59befe7566050737910f6ccdc5e749c7f8860ddc140386463d88c5ad0f3000000002cf68eb4a3d67f9d4c079249f7e4f27b8854815cb1ed13842d4fbf395f9e217fd605ee24090100000065235d9203f458520000000000160014b6d48333bb13b4c644e57c43a9a26df3a44b785e58020000000000001976a914eea9461a9e1e3f765d3af3e726162e0229fe3eb688ac58020000000000001976a9143a8869c9f2b5ea1d4ff3aeeb6a8fb2fffb1ad5fe88ac0ad7125c",
        prevouts: "02591f220000000000225120f25ad35583ea31998d968871d7de1abd2a52f6fe4178b54ea158274806ff4ece48fb310000000000225120f25ad35583ea31998d968871d7de1abd2a52f6fe4178b54ea158274806ff4ece",
        index: 1,
        hash_type: 0x01,
        sighash: "626ab955d58c9a8a600a0c580549d06dc7da4e802eb2a531f62a588e430967a8",
    },
    TaprootVector {
        tx: "0200000001350005f65aa830ced2079df348e2d8c2bdb4f10e2dde6a161d8a07b40d1ad87dae000000001611d0d603d9dc0e000000000017a914459b6d7d6bbb4d8837b4bf7e9a4556f952da2f5c8758020000000000001976a9141dd70e1299ffc2d5b51f6f87de9dfe9398c33cbb88ac58020000000000001976a9141dd70e1299ffc2d5b51f6f87de9dfe9398c33cbb88aca71c1f4f",
        prevouts: "01c4811000000000002251201bf9297d0a2968ae6693aadd0fa514717afefd218087a239afb7418e2d22e65c",
        index: 0,
        hash_type: 0x81,
        sighash: "dfa9437f9c9a1d1f9af271f79f2f5482f287cdb0d2e03fa92c8a9b216cc6061c",
    },
    TaprootVector {
        tx: "020000000185bed1a6da2bffbd60ec681a1bfb71c5111d6395b99b3f8b2bf90167111bcb18f5010000007c83ace802ded24a00000000001600142c4698f9f7a773866879755aa78c516fb332af8e5802000000000000160014d38639dfbac4259323b98a472405db0c461b31fa61073747",
        prevouts: "0144c84d0000000000225120e3f2107989c88e67296ab2faca930efa2e3a5bd3ff0904835a11c9e807458621",
        index: 0,
        hash_type: 0x02,
        sighash: "3129de36a5d05fff97ffca31eb75fcccbbbc27b3147a7a36a9e4b45d8b625067",
    },
    TaprootVector {
        tx: "eb93dbb901028c8515589dac980b6e7f8e4088b77ed866ca0d6d210a7218b6fd0f6b22dd6d7300000000eb4740a9047efc0e0000000000160014913da2128d8fcf292b3691db0e187414aa1783825802000000000000160014913da2128d8fcf292b3691db0e187414aa178382580200000000000017a9143dd27f01c6f7ef9bb9159937b17f17065ed01a0c875802000000000000160014d7630e19df70ada9905ede1722b800c0005f246641000000",
        prevouts: "013fed110000000000225120eb536ae8c33580290630fc495046e998086a64f8f33b93b07967d9029b265c55",
        index: 0,
        hash_type: 0x82,
        sighash: "2441e8b0e063a2083ee790f14f2045022f07258ddde5ee01de543c9e789d80ae",
    },
    TaprootVector {
        tx: "02000000017836b409a5fed32211407e44b971591f2032053f14701fb5b3a30c0ff382f2cc9c0100000061ac55f60288fb5600000000001976a9144ea02f6f182b082fb6ce47e36bbde390b6a41b5088ac58020000000000001976a9144ea02f6f182b082fb6ce47e36bbde390b6a41b5088ace4000000",
        prevouts: "01efa558000000000022512007071ea3dc7e331b0687d0193d1e6d6ed10e645ef36f10ef8831d5e522ac9e80",
        index: 0,
        hash_type: 0x03,
        sighash: "30239345177cadd0e3ea413d49803580abb6cb27971b481b7788a78d35117a88",
    },
    TaprootVector {
        tx: "0100000001aa6deae89d5e0aaca58714fc76ef6f3c8284224888089232d4e663843ed3ab3eae010000008b6657a60450cb4c0000000000160014a3d42b5413ef0c0701c4702f3cd7d4df222c147058020000000000001976a91430b4ed8723a4ee8992aa2c8814cfe5c3ad0ab9d988ac5802000000000000160014365b1166a6ed0a5e8e9dff17a6d00bbb43454bc758020000000000001976a914bc98c51a84fe7fad5dc380eb8b39586eff47241688ac4f313247",
        prevouts: "0107af4e00000000002251202c36d243dfc06cb56a248e62df27ecba7417307511a81ae61aa41c597a929c69",
        index: 0,
        hash_type: 0x83,
        sighash: "bf9c83f26c6dd16449e4921f813f551c4218e86f2ec906ca8611175b41b566df",
    },
];

/// Compact-size count followed by serialized outputs
fn decode_outputs(hex_outputs: &str) -> Vec<TransactionOutput> {
    let bytes = hex::decode(hex_outputs).unwrap();
    let mut reader = ByteReader::new(&bytes);
    let count = reader.read_count().unwrap();
    let outputs: Vec<_> = (0..count)
        .map(|_| TransactionOutput::read_from(&mut reader).unwrap())
        .collect();
    reader.finish().unwrap();
    outputs
}

fn taproot_digest(vector: &TaprootVector, version: SigVersion, options: &TaprootSigHashOptions) -> Hash {
    let tx = Transaction::parse(&hex::decode(vector.tx).unwrap()).unwrap();
    let prevouts = decode_outputs(vector.prevouts);
    hash_for_signature(&tx, vector.index, &prevouts, HashType::from_u32(vector.hash_type), version, options).unwrap()
}

#[test]
fn test_taproot_key_path_known_answers() {
    let options = TaprootSigHashOptions::default();
    for vector in TAPROOT_KEY_PATH_VECTORS {
        let digest = taproot_digest(vector, SigVersion::TaprootKeyPath, &options);
        assert_eq!(
            hex::encode(digest),
            vector.sighash,
            "hash type {:#04x}",
            vector.hash_type
        );
    }
}

#[test]
fn test_taproot_annex_known_answer() {
    let vector = TaprootVector {
        tx: "0200000001df8123752e8f37d132c4e9f1ff7e4f9b986ade9211267e9ebd5fd22a5e718dec6d01000000ce4023b903cb7b23000000000017a914a18b36ea7a094db2f4940fc09edf154e86de7bd787580200000000000017a914afd0d512a2c5c2b40e25669e9cc460303c325b8b87580200000000000017a914a18b36ea7a094db2f4940fc09edf154e86de7bd787f6020000",
        prevouts: "01ea49260000000000225120ab5e9800806bf18cb246edcf5fe63441208fe955a4b5a35bbff65f5db622a010",
        index: 0,
        hash_type: 0x83,
        sighash: "3b003000add359a364a156e73e02846782a59d0d95ca8c4638aaad99f2ef915c",
    };
    let annex = hex::decode("507b979802e62d397acb29f56743a791894b99372872fc5af06a4f6e8d242d0615cda53062bb20e6ec79756fe39183f0c128adfe85559a8fa042b042c018aa8010143799e44f0893c40e1e").unwrap();
    let options = TaprootSigHashOptions {
        annex_hash: Some(annex_hash(&annex)),
        ..Default::default()
    };

    let digest = taproot_digest(&vector, SigVersion::TaprootKeyPath, &options);
    assert_eq!(hex::encode(digest), vector.sighash);

    let without_annex = taproot_digest(&vector, SigVersion::TaprootKeyPath, &TaprootSigHashOptions::default());
    assert_ne!(without_annex, digest);
}

#[test]
fn test_taproot_script_path_known_answer() {
    let vector = TaprootVector {
        tx: "020000000189fc651483f9296b906455dd939813bf086b1bbe7c77635e157c8e14ae29062195010000004445b5c7044561320000000000160014331414dbdada7fb578f700f38fb69995fc9b5ab958020000000000001976a914268db0a8104cc6d8afd91233cc8b3d1ace8ac3ef88ac580200000000000017a914ec00dcb368d6a693e11986d265f659d2f59e8be2875802000000000000160014c715799a49a0bae3956df9c17cb4440a673ac0df6f010000",
        prevouts: "011bec34000000000022512028055142ea437db73382e991861446040b61dd2185c4891d7daf6893d79f7182",
        index: 0,
        hash_type: 0x01,
        sighash: "d66de5274a60400c7b08c86ba6b7f198f40660079edf53aca89d2a9501317f2e",
    };
    let script = hex::decode("20cc4e1107aea1d170c5ff5b6817e1303010049724fb3caa7941792ea9d29b3e2bacab").unwrap();
    let options = TaprootSigHashOptions {
        tap_leaf_hash: Some(tap_leaf_hash(TAPROOT_LEAF_TAPSCRIPT, &script)),
        code_separator_position: u32::MAX,
        ..Default::default()
    };

    let digest = taproot_digest(&vector, SigVersion::TaprootScriptPath, &options);
    assert_eq!(hex::encode(digest), vector.sighash);

    let moved_separator = TaprootSigHashOptions {
        code_separator_position: 0,
        ..options
    };
    assert_ne!(taproot_digest(&vector, SigVersion::TaprootScriptPath, &moved_separator), digest);
}

fn arb_single_out_of_range() -> impl Strategy<Value = (Transaction, usize)> {
    (2usize..6)
        .prop_flat_map(|inputs| (Just(inputs), 0..inputs))
        .prop_flat_map(|(inputs, outputs)| (Just(inputs), Just(outputs), outputs..inputs))
        .prop_map(|(inputs, outputs, index)| {
            let tx = Transaction {
                version: 1,
                inputs: (0..inputs).map(|i| input(i as u8 + 1)).collect(),
                outputs: (0..outputs).map(|i| output(1_000 * (i as i64 + 1))).collect(),
                lock_time: 0,
                witnesses: vec![],
            };
            (tx, index)
        })
}

proptest! {
    /// Legacy SINGLE without a matching output signs uint256 one
    #[test]
    fn prop_legacy_single_error_hash((tx, index) in arb_single_out_of_range(), acp in any::<bool>()) {
        let hash_type = if acp { HashType::SINGLE_ANYONECANPAY } else { HashType::SINGLE };
        prop_assert!(hash_type.is_single());
        let sighash = digest(&tx, index, &[output(5_000)], hash_type, SigVersion::Base);
        prop_assert_eq!(sighash, ERROR_HASH);
        let mut expected = [0u8; 32];
        expected[0] = 1;
        prop_assert_eq!(sighash, expected);
    }

    /// Legacy hashing of an index past the inputs signs uint256 one too
    #[test]
    fn prop_legacy_index_past_inputs(extra in 0usize..4) {
        let tx = sample_tx();
        let sighash = digest(&tx, tx.inputs.len() + extra, &[output(5_000)], HashType::ALL, SigVersion::Base);
        prop_assert_eq!(sighash, ERROR_HASH);
    }
}
