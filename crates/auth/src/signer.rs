//! Wallet signing capability.

use async_trait::async_trait;

/// External signer supplied by a wallet plugin. The engine fetches a
/// challenge, hands the message to the signer, and submits the signature for
/// verification; it never holds key material.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Wallet address (0x-prefixed hex for Ethereum).
    fn address(&self) -> String;

    /// Sign the challenge message; the error string is surfaced in auth
    /// state.
    async fn sign(&self, message: &str) -> Result<String, String>;
}
