mod common;

use common::*;
use evm_receipt_indexer::Fetcher;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use wiremock::MockServer;

fn fetcher(server: &MockServer, program: Pubkey) -> Fetcher {
    Fetcher::new(server.uri(), CommitmentConfig::confirmed(), program).with_concurrency(3)
}

#[tokio::test]
async fn test_fetch_signatures_page_and_cursor() {
    let server = MockServer::start().await;
    let program = Pubkey::new_unique();
    let txs = vec![
        MockTx::new(3, 30, program, Pubkey::new_unique(), Pubkey::new_unique()),
        MockTx::new(2, 20, program, Pubkey::new_unique(), Pubkey::new_unique()).failed(),
        MockTx::new(1, 10, program, Pubkey::new_unique(), Pubkey::new_unique()),
    ];
    mount_chain(&server, 40, &txs).await;

    let fetcher = fetcher(&server, program);
    assert_eq!(fetcher.get_slot().await.unwrap(), 40);

    let page = fetcher.fetch_signatures_page(None).await.unwrap();
    let slots: Vec<u64> = page.iter().map(|info| info.slot).collect();
    assert_eq!(slots, vec![30, 20, 10]);
    assert_eq!(page[0].signature, sig(3));
    assert!(page[1].failed);
    assert!(!page[2].failed);

    let next = fetcher
        .fetch_signatures_page(Some(&page[2].signature))
        .await
        .unwrap();
    assert!(next.is_empty());
}

#[tokio::test]
async fn test_fetch_transactions_preserves_order() {
    let server = MockServer::start().await;
    let program = Pubkey::new_unique();
    let storage_account = Pubkey::new_unique();
    let txs: Vec<MockTx> = (1..=5u8)
        .rev()
        .map(|seed| {
            MockTx::new(seed, u64::from(seed) * 10, program, storage_account, Pubkey::new_unique())
                .instruction(&[1], &continue_step(u64::from(seed)))
                .markers(&[return_marker(0x11, u64::from(seed), &[])])
        })
        .collect();
    mount_chain(&server, 60, &txs).await;

    let fetcher = fetcher(&server, program);
    let page = fetcher.fetch_signatures_page(None).await.unwrap();
    let fetched = fetcher.fetch_transactions(&page).await.unwrap();

    assert_eq!(fetched.len(), 5);
    for (info, tx) in page.iter().zip(&fetched) {
        assert_eq!(tx.signature, info.signature);
        assert_eq!(tx.slot, info.slot);
        assert_eq!(tx.instructions[0].program_id, program);
        assert_eq!(tx.instructions[0].accounts, vec![storage_account]);
        assert_eq!(tx.inner_instructions.len(), 1);
    }
}

#[tokio::test]
async fn test_fetch_transaction_reports_failure() {
    let server = MockServer::start().await;
    let program = Pubkey::new_unique();
    let tx = MockTx::new(9, 90, program, Pubkey::new_unique(), Pubkey::new_unique())
        .instruction(&[1, 2], &[0x0b])
        .failed();
    mount_chain(&server, 100, &[tx]).await;

    let tx = fetcher(&server, program)
        .fetch_transaction(&sig(9))
        .await
        .unwrap();
    assert!(tx.failed);
    assert_eq!(tx.slot, 90);
    assert_eq!(tx.instructions[0].data, vec![0x0b]);
}

#[tokio::test]
async fn test_fetch_transaction_missing_is_an_error() {
    let server = MockServer::start().await;
    let program = Pubkey::new_unique();
    mount_chain(&server, 100, &[]).await;

    let result = fetcher(&server, program).fetch_transaction(&sig(8)).await;
    assert!(result.is_err());
}
