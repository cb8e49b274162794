//! File-piece fingerprinting for content transferred between peers.
//!
//! DESIGN DECISION: chunk files into size-dependent pieces and hash each piece
//! independently (SHA-256), so partial transfers can be verified piece-by-piece
//! instead of re-hashing an entire file on every integrity check.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One content-addressed chunk of a larger file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePiece {
    /// Offset of this piece within the source file, in bytes.
    pub offset: u64,
    /// Length of this piece, in bytes.
    pub length: u64,
    /// SHA-256 digest of the piece bytes, hex-encoded.
    pub hash: String,
}

/// Chunks and hashes files using a size-dependent piece length, mirroring
/// how torrent-style content distribution scales piece size with file size
/// to bound the metadata overhead of very large files.
pub struct FilePieceHasher;

impl FilePieceHasher {
    /// Selects a piece size for a file of the given total length.
    ///
    /// | file size   | piece size |
    /// |-------------|------------|
    /// | >= 2 MiB    | 1 MiB      |
    /// | >= 1 MiB    | 512 KiB    |
    /// | >= 512 KiB  | 256 KiB    |
    /// | >= 256 KiB  | 128 KiB    |
    /// | >= 128 KiB  | 64 KiB     |
    /// | >= 64 KiB   | 32 KiB     |
    /// | else        | 16 KiB     |
    pub fn piece_size_for(total_len: u64) -> u64 {
        const KIB: u64 = 1024;
        const MIB: u64 = 1024 * KIB;
        match total_len {
            n if n >= 2 * MIB => MIB,
            n if n >= MIB => 512 * KIB,
            n if n >= 512 * KIB => 256 * KIB,
            n if n >= 256 * KIB => 128 * KIB,
            n if n >= 128 * KIB => 64 * KIB,
            n if n >= 64 * KIB => 32 * KIB,
            _ => 16 * KIB,
        }
    }

    /// Splits `data` into pieces and hashes each one.
    pub fn hash_pieces(data: &[u8]) -> Vec<FilePiece> {
        let piece_size = Self::piece_size_for(data.len() as u64) as usize;
        if data.is_empty() {
            return Vec::new();
        }
        data.chunks(piece_size)
            .enumerate()
            .map(|(i, chunk)| {
                let mut hasher = Sha256::new();
                hasher.update(chunk);
                FilePiece {
                    offset: (i * piece_size) as u64,
                    length: chunk.len() as u64,
                    hash: hex::encode(hasher.finalize()),
                }
            })
            .collect()
    }

    /// Verifies that `data` matches a previously computed piece list,
    /// re-hashing each piece at its recorded offset/length.
    pub fn verify(data: &[u8], pieces: &[FilePiece]) -> bool {
        for piece in pieces {
            let start = piece.offset as usize;
            let end = start + piece.length as usize;
            let Some(chunk) = data.get(start..end) else {
                return false;
            };
            let mut hasher = Sha256::new();
            hasher.update(chunk);
            if hex::encode(hasher.finalize()) != piece.hash {
                return false;
            }
        }
        true
    }

    /// Reassembles the original byte stream from piece-ordered chunks.
    /// Pieces must be supplied in file order; this does not sort them.
    pub fn reassemble(chunks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunks.iter().map(|c| c.len()).sum());
        for chunk in chunks {
            out.extend_from_slice(chunk);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_size_table() {
        const KIB: u64 = 1024;
        const MIB: u64 = 1024 * KIB;
        assert_eq!(FilePieceHasher::piece_size_for(0), 16 * KIB);
        assert_eq!(FilePieceHasher::piece_size_for(64 * KIB), 32 * KIB);
        assert_eq!(FilePieceHasher::piece_size_for(128 * KIB), 64 * KIB);
        assert_eq!(FilePieceHasher::piece_size_for(256 * KIB), 128 * KIB);
        assert_eq!(FilePieceHasher::piece_size_for(512 * KIB), 256 * KIB);
        assert_eq!(FilePieceHasher::piece_size_for(MIB), 512 * KIB);
        assert_eq!(FilePieceHasher::piece_size_for(2 * MIB), MIB);
        assert_eq!(FilePieceHasher::piece_size_for(10 * MIB), MIB);
    }

    #[test]
    fn test_hash_pieces_deterministic() {
        let data = vec![7u8; 200 * 1024];
        let a = FilePieceHasher::hash_pieces(&data);
        let b = FilePieceHasher::hash_pieces(&data);
        assert_eq!(a, b);
        assert!(a.len() > 1);
    }

    #[test]
    fn test_verify_accepts_matching_pieces() {
        let data = vec![3u8; 50 * 1024];
        let pieces = FilePieceHasher::hash_pieces(&data);
        assert!(FilePieceHasher::verify(&data, &pieces));
    }

    #[test]
    fn test_verify_rejects_tampered_data() {
        let data = vec![3u8; 50 * 1024];
        let pieces = FilePieceHasher::hash_pieces(&data);
        let mut tampered = data.clone();
        tampered[0] ^= 0xFF;
        assert!(!FilePieceHasher::verify(&tampered, &pieces));
    }

    #[test]
    fn test_reassemble_reproduces_source_bytes() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let piece_size = FilePieceHasher::piece_size_for(data.len() as u64) as usize;
        let chunks: Vec<Vec<u8>> = data.chunks(piece_size).map(|c| c.to_vec()).collect();
        let reassembled = FilePieceHasher::reassemble(&chunks);
        assert_eq!(reassembled, data);
    }

    #[test]
    fn test_empty_data_has_no_pieces() {
        assert!(FilePieceHasher::hash_pieces(&[]).is_empty());
    }
}
