//! Benchmarks for call encoding and transaction serialization
//!
//! Serialization runs on the broadcast loop for every attempt, so it is
//! measured together with ABI encoding of typical parameter lists.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::Value;
use tron_relayer::tx_builder::{abi, build_transaction, BlockRef, ContractCallData};
use tron_relayer::TronAddress;

fn transfer_params(to: &TronAddress) -> Vec<Value> {
    vec![
        "address".into(),
        to.to_base58().into(),
        "uint256".into(),
        "1000000".into(),
    ]
}

/// `n` dynamic `bytes` arguments of 64 bytes each
fn bytes_params(n: usize) -> Vec<Value> {
    (0..n)
        .flat_map(|i| {
            let payload = hex::encode(vec![i as u8; 64]);
            [Value::from("bytes"), Value::from(payload)]
        })
        .collect()
}

fn bench_encode_call(c: &mut Criterion) {
    let to = TronAddress::from_evm_bytes(&[0x42; 20]);
    let params = transfer_params(&to);

    c.bench_function("encode_transfer_call", |b| {
        b.iter(|| abi::encode_call(black_box("transfer(address,uint256)"), black_box(&params)))
    });

    let mut group = c.benchmark_group("encode_bytes_params");
    for n in [1usize, 4, 16] {
        let params = bytes_params(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &params, |b, params| {
            b.iter(|| abi::encode_params(black_box(params)))
        });
    }
    group.finish();
}

fn bench_build_transaction(c: &mut Criterion) {
    let owner = TronAddress::from_evm_bytes(&[0x11; 20]);
    let contract = TronAddress::from_evm_bytes(&[0xcc; 20]);
    let block_id = format!("{:016x}{}", 61_000_000u64, "ab".repeat(24));
    let block = match BlockRef::from_block(61_000_000, &block_id) {
        Ok(block) => block,
        Err(e) => panic!("block ref: {e}"),
    };

    let mut group = c.benchmark_group("build_transaction");
    for data_len in [68usize, 1024, 8192] {
        let call = ContractCallData {
            owner_address: owner,
            contract_address: contract,
            call_value: 0,
            data: vec![0xab; data_len],
        };
        group.bench_with_input(BenchmarkId::from_parameter(data_len), &call, |b, call| {
            b.iter(|| {
                build_transaction(
                    black_box(call),
                    black_box(&block),
                    5_880_000,
                    1_700_000_000_000,
                    None,
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode_call, bench_build_transaction);
criterion_main!(benches);
