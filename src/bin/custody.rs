//! Custody CLI: key handling, Shamir splitting and an end-to-end demo
//!
//! Commands:
//!   custody keygen   generate an X25519 key pair
//!   custody encrypt  encrypt a file to a public key
//!   custody decrypt  decrypt an envelope with a private key file
//!   custody split    split a private key file into share files
//!   custody combine  rebuild a private key from share files
//!   custody config   write or show the runtime configuration
//!   custody demo     protect, decrypt and transfer a secret asset

use custody_core::coordinator::{run_decryption, RecordBook};
use custody_core::crypto::PrivateKey;
use custody_core::custodian::{serve_custodian, EnclaveConfig, HealthStatus};
use custody_core::{
    decrypt, encrypt, protect, reconstruct, split, CustodyConfig, CustodyContext, DiskBlobStore,
    EncryptedPayload, EnclaveCustodian, Identity, InMemoryLedger, KeyPair, Ledger, PublicKey,
    RemoteCustodian, Share, SplitSpec,
};
use std::env;
use std::error::Error;
use std::fs;
use std::sync::Arc;
use tokio::net::TcpListener;
use zeroize::Zeroizing;

const KEY_FILE: &str = "custody.key";
const CONFIG_FILE: &str = "custody.json";

fn print_usage() {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║        Custody v0.1: Secret Asset Key Custody                ║
║        Hybrid Encryption + K-of-N Enclave Quorum             ║
╚══════════════════════════════════════════════════════════════╝

Usage: custody <command> [options]

Commands:
  keygen   [key-file]                        Generate a key pair
  encrypt  <public-key-hex> <in> <out>       Encrypt a file to a public key
  decrypt  <key-file> <in> <out>             Decrypt an envelope
  split    <key-file> [total] [threshold]    Split a private key into share files
  combine  <share-file>...                   Rebuild a private key from shares
  config   [path]                            Write defaults if missing, then show
  demo                                       Run the full custody demo

Examples:
  custody keygen
  custody encrypt 3b6a27bc... artwork.png artwork.enc
  custody split custody.key 5 3
  custody combine share-1.json share-3.json share-5.json
  custody demo
"#
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "keygen" => cmd_keygen(&args[2..]),
        "encrypt" => cmd_encrypt(&args[2..]),
        "decrypt" => cmd_decrypt(&args[2..]),
        "split" => cmd_split(&args[2..]),
        "combine" => cmd_combine(&args[2..]),
        "config" => cmd_config(&args[2..]),
        "demo" => cmd_demo().await,
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("  Error: {}", e);
        std::process::exit(1);
    }
}

type CmdResult = Result<(), Box<dyn Error>>;

fn usage_error(usage: &str) -> Box<dyn Error> {
    format!("usage: custody {}", usage).into()
}

fn read_private_key(path: &str) -> Result<PrivateKey, Box<dyn Error>> {
    let text = Zeroizing::new(fs::read_to_string(path)?);
    let bytes = Zeroizing::new(hex::decode(text.trim())?);
    Ok(PrivateKey::from_bytes(&bytes)?)
}

fn write_private_key(path: &str, key: &PrivateKey) -> CmdResult {
    let text = Zeroizing::new(hex::encode(key.as_bytes()));
    fs::write(path, text.as_bytes())?;
    Ok(())
}

fn cmd_keygen(args: &[String]) -> CmdResult {
    let path = args.first().map(|s| s.as_str()).unwrap_or(KEY_FILE);
    let pair = KeyPair::generate()?;
    write_private_key(path, pair.private_key())?;

    println!("\n  Key pair generated");
    println!("  Public key:   {}", pair.public_key.to_hex());
    println!("  Fingerprint:  {}", pair.public_key.fingerprint());
    println!("  Private key:  {} (keep it offline)", path);
    Ok(())
}

fn cmd_encrypt(args: &[String]) -> CmdResult {
    let (key_hex, input, output) = match args {
        [k, i, o, ..] => (k, i, o),
        _ => return Err(usage_error("encrypt <public-key-hex> <in> <out>")),
    };
    let recipient = PublicKey::from_hex(key_hex)?;
    let plaintext = Zeroizing::new(fs::read(input)?);
    let envelope = encrypt(&plaintext, &recipient)?;
    fs::write(output, envelope.to_bytes()?)?;

    println!(
        "  Encrypted {} ({} bytes) for {} -> {}",
        input,
        plaintext.len(),
        recipient.fingerprint(),
        output
    );
    Ok(())
}

fn cmd_decrypt(args: &[String]) -> CmdResult {
    let (key_file, input, output) = match args {
        [k, i, o, ..] => (k, i, o),
        _ => return Err(usage_error("decrypt <key-file> <in> <out>")),
    };
    let key = read_private_key(key_file)?;
    let envelope = EncryptedPayload::from_bytes(&fs::read(input)?)?;
    let plaintext = Zeroizing::new(decrypt(&envelope, &key)?);
    fs::write(output, plaintext.as_slice())?;

    println!("  Decrypted {} -> {} ({} bytes)", input, output, plaintext.len());
    Ok(())
}

fn cmd_split(args: &[String]) -> CmdResult {
    let key_file = args
        .first()
        .ok_or_else(|| usage_error("split <key-file> [total] [threshold]"))?;
    let defaults = SplitSpec::default();
    let total: u8 = args
        .get(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(defaults.total_shares);
    let threshold: u8 = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(defaults.threshold);
    let spec = SplitSpec::new(total, threshold)?;

    let key = read_private_key(key_file)?;
    let shares = split(key.as_bytes(), spec)?;

    println!("\n  Split {} into {} (public key {})", key_file, spec, key.public_key().fingerprint());
    for share in &shares {
        let path = format!("share-{}.json", share.index);
        fs::write(&path, Zeroizing::new(share.to_bytes()?).as_slice())?;
        println!("  [{}] {} checksum={}", share.index, path, &share.checksum[..16]);
    }
    println!("  Any {} of these rebuild the key; fewer reveal nothing.", spec.threshold);
    Ok(())
}

fn cmd_combine(args: &[String]) -> CmdResult {
    if args.is_empty() {
        return Err(usage_error("combine <share-file>..."));
    }
    let mut shares = Vec::with_capacity(args.len());
    for path in args {
        let bytes = Zeroizing::new(fs::read(path)?);
        shares.push(Share::from_bytes(&bytes)?);
    }

    let threshold = shares[0].threshold;
    let highest = shares.iter().map(|s| s.index).max().unwrap_or(threshold);
    let spec = SplitSpec::new(highest.max(threshold), threshold)?;

    let secret = reconstruct(&shares, spec)?;
    let key = PrivateKey::from_bytes(&secret)?;
    let out = "custody-combined.key";
    write_private_key(out, &key)?;

    println!(
        "  Rebuilt key from {} shares: public key {} -> {}",
        shares.len(),
        key.public_key().fingerprint(),
        out
    );
    Ok(())
}

fn cmd_config(args: &[String]) -> CmdResult {
    let path = args.first().map(|s| s.as_str()).unwrap_or(CONFIG_FILE);
    let config = CustodyConfig::load_or_default(path)?;
    if !std::path::Path::new(path).exists() {
        config.save(path)?;
        println!("  Wrote default config to {}", path);
    }

    println!("\n  Custody Config ({})", path);
    println!("  {}", "=".repeat(40));
    println!("  Split:             {}", config.split);
    println!("  Retry:             {} attempts, backoff {}..{} ms",
        config.retry.max_attempts, config.retry.initial_backoff_ms, config.retry.max_backoff_ms);
    println!("  Call timeout:      {} ms", config.call_timeout_ms);
    println!("  Request deadline:  {} ms", config.request_deadline_ms);
    println!("  Proof validity:    {} s", config.proof_validity_secs);
    println!("  Simulated TEEs:    {}", config.attestation.allow_simulated);
    Ok(())
}

async fn cmd_demo() -> CmdResult {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║              Custody v0.1: Full Demo                         ║
║       Protect + Quorum Decrypt + Ownership Transfer          ║
╚══════════════════════════════════════════════════════════════╝
"#
    );

    let work_dir = env::temp_dir().join(format!("custody-demo-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&work_dir)?;

    // Step 1: Ledger and asset
    println!("Step 1: Minting a secret asset...");
    println!("{}", "-".repeat(60));
    let ledger = Arc::new(InMemoryLedger::new());
    let artist = Identity::generate();
    let asset = ledger.mint(&artist.account());
    println!("  Asset {} owned by {}", asset, artist.account().short());

    // Step 2: Custodians, four in-process and one over TCP
    println!("\nStep 2: Starting 5 enclave custodians...");
    println!("{}", "-".repeat(60));
    let config = CustodyConfig::default();
    let blobs = Arc::new(DiskBlobStore::open(work_dir.join("blobs"))?);
    let records = RecordBook::open(work_dir.join("records.json"))?;
    let mut ctx = CustodyContext::new(config.clone(), ledger.clone(), blobs).with_records(records);

    let mut local = Vec::new();
    for i in 1..=4 {
        let enclave_config = EnclaveConfig::simulated(format!("custodian-{}", i))
            .with_sealed_dir(work_dir.join("sealed"));
        let enclave = Arc::new(EnclaveCustodian::new(enclave_config, ledger.clone())?);
        ctx.register_custodian(enclave.clone());
        local.push(enclave);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let remote_enclave = Arc::new(EnclaveCustodian::new(
        EnclaveConfig::simulated("custodian-5"),
        ledger.clone(),
    )?);
    let server = tokio::spawn(serve_custodian(listener, remote_enclave));
    ctx.register_custodian(Arc::new(RemoteCustodian::new("custodian-5", addr)));

    for (id, status) in ctx.custodians.health_check_all().await {
        let location = ctx
            .custodians
            .record(&id)
            .map(|r| r.endpoint)
            .unwrap_or_default();
        println!("  {:<12} {:<28} {:?}", id, location, status);
    }

    // Step 3: Protect
    println!("\nStep 3: Protecting the unlockable content ({})...", config.split);
    println!("{}", "-".repeat(60));
    let payload = b"Full resolution master file, unlockable by the holder only";
    let record = protect(&ctx, &artist, &asset, payload, config.split).await?;
    println!("  Ciphertext:  {}", record.content_id);
    println!("  Public key:  {}", record.public_key.fingerprint());
    for p in &record.placements {
        println!("  Share {} -> {}", p.share_index, p.custodian_id);
    }

    // Step 4: Owner decrypts
    println!("\nStep 4: Owner requests decryption...");
    println!("{}", "-".repeat(60));
    let proof = ledger.sign_proof(&artist, &asset)?;
    let (session, result) = run_decryption(&ctx, &asset, &proof).await;
    let plaintext = result?;
    println!("  Path:      {:?}", session.path());
    println!("  Payload:   '{}'", String::from_utf8_lossy(&plaintext));

    // Step 5: Lose N-K custodians
    println!("\nStep 5: Taking custodian-1 and custodian-2 offline...");
    println!("{}", "-".repeat(60));
    for enclave in &local[..2] {
        enclave.set_status(HealthStatus::Unavailable).await;
    }
    let proof = ledger.sign_proof(&artist, &asset)?;
    match custody_core::request_decryption(&ctx, &asset, &proof).await {
        Ok(p) => println!("  Still decrypts with 3 of 5: {} bytes", p.len()),
        Err(e) => eprintln!("  Unexpected failure: {}", e),
    }
    for enclave in &local[..2] {
        enclave.set_status(HealthStatus::Healthy).await;
    }

    // Step 6: Transfer
    println!("\nStep 6: Selling the asset...");
    println!("{}", "-".repeat(60));
    let collector = Identity::generate();
    let stale = ledger.sign_proof(&artist, &asset)?;
    ledger.transfer(&asset, &artist, &collector.account())?;
    println!("  {} -> {}", artist.account().short(), collector.account().short());

    match custody_core::request_decryption(&ctx, &asset, &stale).await {
        Ok(_) => eprintln!("  Previous owner's proof was accepted!"),
        Err(e) => println!("  Previous owner refused: {}", e),
    }
    let proof = ledger.sign_proof(&collector, &asset)?;
    let plaintext = custody_core::request_decryption(&ctx, &asset, &proof).await?;
    println!("  New owner decrypts: '{}'", String::from_utf8_lossy(&plaintext));

    server.abort();
    let _ = fs::remove_dir_all(&work_dir);
    println!("\n  Demo complete.");
    Ok(())
}
