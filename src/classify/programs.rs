//! Well-known Solana program ids, grouped by what a call to them usually means.

use solana_pubkey::Pubkey;
use std::str::FromStr;

/// SPL Token Program ID
pub const TOKEN_PROGRAM_ID: Pubkey = spl_token::ID;

/// Token-2022 Program ID
pub const TOKEN_2022_PROGRAM_ID: Pubkey = spl_token_2022::ID;

/// Associated Token Account Program ID
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = spl_associated_token_account::ID;

/// System Program ID
pub const SYSTEM_PROGRAM_ID: Pubkey = solana_sdk_ids::system_program::ID;

/// Native Stake Program ID
pub const STAKE_PROGRAM_ID: Pubkey = solana_sdk_ids::stake::ID;

/// SPL token instruction tags (first data byte).
pub mod token_instruction {
    pub const TRANSFER: u8 = 3;
    pub const APPROVE: u8 = 4;
    pub const TRANSFER_CHECKED: u8 = 12;
    pub const APPROVE_CHECKED: u8 = 13;
}

/// System program `Transfer` discriminator (u32 LE).
pub const SYSTEM_TRANSFER_TAG: [u8; 4] = [2, 0, 0, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramCategory {
    Swap,
    NftMint,
    Memo,
    Stake,
    Defi,
    Token,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownProgram {
    pub id: Pubkey,
    pub name: &'static str,
    pub category: ProgramCategory,
}

const TABLE: &[(&str, &str, ProgramCategory)] = &[
    // Swaps / aggregators / order books
    ("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4", "Jupiter", ProgramCategory::Swap),
    ("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc", "Orca Whirlpools", ProgramCategory::Swap),
    ("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", "Raydium AMM", ProgramCategory::Swap),
    ("CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK", "Raydium CLMM", ProgramCategory::Swap),
    ("PhoeNiXZ8ByJGLkxNfZRnkUfjvmuYqLR89jjFHGqdXY", "Phoenix", ProgramCategory::Swap),
    ("LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo", "Meteora DLMM", ProgramCategory::Swap),
    // NFT minting
    ("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s", "Metaplex Token Metadata", ProgramCategory::NftMint),
    ("CndyV3LdqHUfDLmE5naZjVN8rBZz4tqhdefbAnjHG3JR", "Candy Machine", ProgramCategory::NftMint),
    ("Guard1JwRhJkVH6XZhzoYxeBVQe872VH6QggF4BWmS9g", "Candy Guard", ProgramCategory::NftMint),
    ("BGUMAp9Gq7iTEuizy4pqaxsTyUCBK68MDfK752saRPUY", "Bubblegum", ProgramCategory::NftMint),
    // Memo
    ("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr", "Memo", ProgramCategory::Memo),
    // Liquid staking
    ("MarBmsSgKXdrN1egZf5sqe1TMai9K1rChYNDJgjq7aD", "Marinade", ProgramCategory::Stake),
    ("SPoo1Ku8WFXoNDMHPsrGSTSG1Y47rzgn41SLUNakuHy", "SPL Stake Pool", ProgramCategory::Stake),
    // Lending / perps
    ("So1endDq2YkqhipRh3WViPa8hdiSpxWy6z3Z6tMCpAo", "Solend", ProgramCategory::Defi),
    ("KLend2g3cP87fffoy8q1mQqGKjrxjC8boSyAYavgmjD", "Kamino Lend", ProgramCategory::Defi),
    ("MFv2hWf31Z9kbCa1snEPYctwafyhdvnV7FZnsebVacA", "MarginFi", ProgramCategory::Defi),
    ("dRiftyHA39MWEi3m9aunc5MzRF1JYuBsbn6VPcn33UH", "Drift", ProgramCategory::Defi),
];

lazy_static::lazy_static! {
    /// Every known program. Entries whose id fails to parse are skipped.
    pub static ref KNOWN_PROGRAMS: Vec<KnownProgram> = {
        let mut programs = vec![
            KnownProgram { id: TOKEN_PROGRAM_ID, name: "SPL Token", category: ProgramCategory::Token },
            KnownProgram { id: TOKEN_2022_PROGRAM_ID, name: "Token-2022", category: ProgramCategory::Token },
            KnownProgram {
                id: ASSOCIATED_TOKEN_PROGRAM_ID,
                name: "Associated Token Account",
                category: ProgramCategory::Token,
            },
            KnownProgram { id: SYSTEM_PROGRAM_ID, name: "System", category: ProgramCategory::System },
            KnownProgram { id: STAKE_PROGRAM_ID, name: "Stake", category: ProgramCategory::Stake },
        ];
        programs.extend(TABLE.iter().filter_map(|&(id, name, category)| {
            Pubkey::from_str(id).ok().map(|id| KnownProgram { id, name, category })
        }));
        programs
    };
}

pub fn lookup(id: &Pubkey) -> Option<&'static KnownProgram> {
    KNOWN_PROGRAMS.iter().find(|p| &p.id == id)
}

pub fn is_token_program(id: &Pubkey) -> bool {
    *id == TOKEN_PROGRAM_ID || *id == TOKEN_2022_PROGRAM_ID
}
