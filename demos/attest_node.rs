//! Example: one attestation cycle for a node, from challenge to revocation
//!
//! Run with: cargo run --example attest_node
//! Set RUST_LOG=verifier_core=debug to see the engine's logs.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use verifier_core::mock::{test_keypair, MockQuoteVerifier, MockRegistrar};
use verifier_core::{
    project_status, BroadcastChannel, MemoryStore, NodeId, NodeRecordBuilder, NotifyOutcome,
    PcrPolicy, QuoteEngine, RecordStore, RevocationKey, RevocationNotifier, SecretProvisioner,
    SecretShare, Signer, VerifierConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("🛡️  Node Verifier - Example Usage\n");
    println!("==============================================\n");

    let config = VerifierConfig::default();
    let registrar = Arc::new(MockRegistrar::default());
    let quotes = Arc::new(MockQuoteVerifier::new());
    let channel = Arc::new(BroadcastChannel::new(16));
    let mut subscriber = channel.subscribe();

    let engine = QuoteEngine::new(config.clone(), registrar, quotes.clone());
    let provisioner = SecretProvisioner::new(config.clone());
    let notifier = RevocationNotifier::new(config.clone(), channel);
    let store = MemoryStore::new();

    // Step 1: Register the node
    println!("1️⃣  Registering node...");
    let revocation_signer = Signer::generate();
    let mut record = NodeRecordBuilder::new()
        .node_id(NodeId("node-001".to_string()))
        .network("127.0.0.1", 9002)
        .secret_share(SecretShare(vec![0x42; 32]))
        .tpm_policy(PcrPolicy::new("0x408000").allow(15, "0".repeat(40)))
        .metadata("cluster", "demo")
        .revocation_signing_key(RevocationKey::from(revocation_signer.signing_key()))
        .build()?;
    store.put(&record).await?;
    println!("   ✓ {} registered at {}\n", record.node_id, record.network);

    // Step 2: Challenge
    println!("2️⃣  Issuing challenge...");
    let challenge = engine.begin_challenge(&mut record);
    println!("   ✓ Payload: {}\n", serde_json::to_string(&challenge)?);

    // Step 3: The node answers with a quote and its public key
    println!("3️⃣  Validating quote...");
    let (_node_private_key, node_public_key) = test_keypair()?;
    let response = serde_json::json!({
        "quote": MockQuoteVerifier::quote_for(&challenge.nonce),
        "pubkey": node_public_key,
    });
    let result = engine
        .validate_response(&mut record, &serde_json::to_vec(&response)?)
        .await;
    println!("   ✓ Result: {:?}", result);
    println!("   ✓ Needs provisioning: {}\n", record.needs_provisioning);

    // Step 4: Provision the secret share
    println!("4️⃣  Preparing secret payload...");
    let payload = provisioner.prepare_secret_payload(&mut record)?;
    record.needs_provisioning = false;
    println!("   ✓ Ciphertext: {} bytes (base64)\n", payload.encrypted_key.len());
    store.put(&record).await?;

    // Step 5: A later quote violates policy
    println!("5️⃣  Simulating a policy violation...");
    quotes.reject_all();
    let challenge = engine.begin_challenge(&mut record);
    let response = serde_json::json!({ "quote": MockQuoteVerifier::quote_for(&challenge.nonce) });
    let result = engine
        .validate_response(&mut record, &serde_json::to_vec(&response)?)
        .await;
    println!("   ✓ Result: {:?}\n", result);

    // Step 6: Revoke
    println!("6️⃣  Publishing revocation...");
    if let NotifyOutcome::Published(notice) = notifier.notify_revocation(&record)? {
        let received = subscriber.recv().await?;
        println!("   ✓ Subscriber received: {}", received.msg);
        match notice.verify(&revocation_signer.verifying_key()) {
            Ok(()) => println!("   ✅ Signature VALID\n"),
            Err(e) => println!("   ❌ Signature INVALID: {:?}\n", e),
        }
    }

    // Step 7: Tenant status
    println!("7️⃣  Tenant status view...");
    let view = project_status(&record, &config);
    println!("   ✓ {}\n", serde_json::to_string_pretty(&view)?);

    println!("==============================================");
    println!("✅ Attestation cycle complete!");
    Ok(())
}
