use super::*;
use crate::embeddings::ChunkMetadata;

fn chunk(text: &str, chunk_index: usize) -> DocumentChunk {
    DocumentChunk {
        text: text.to_string(),
        metadata: ChunkMetadata {
            source: PathBuf::from("/docs/a.txt"),
            page: None,
            chunk_index,
        },
    }
}

#[test]
fn identity_is_deterministic() {
    let path = Path::new("/home/user/docs/Annual Report.txt");

    let first = IndexIdentity::from_path(path);
    let second = IndexIdentity::from_path(path);

    assert_eq!(first, second);
    assert!(first.as_str().starts_with("Annual_Report_"));
    let hash = first
        .as_str()
        .rsplit('_')
        .next()
        .expect("identity has a hash suffix");
    assert_eq!(hash.len(), 8);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn identity_matches_sha256_prefix() {
    let path = Path::new("/tmp/notes.md");
    let expected = format!("{:x}", Sha256::digest(b"/tmp/notes.md"));

    let identity = IndexIdentity::from_path(path);

    assert_eq!(identity.as_str(), format!("notes_{}", &expected[..8]));
}

#[test]
fn same_name_different_directories_differ() {
    let a = IndexIdentity::from_path(Path::new("/a/manual.txt"));
    let b = IndexIdentity::from_path(Path::new("/b/manual.txt"));

    assert_ne!(a, b);
    assert!(a.as_str().starts_with("manual_"));
    assert!(b.as_str().starts_with("manual_"));
}

#[test]
fn identity_sanitizes_stem() {
    let identity = IndexIdentity::from_path(Path::new("/docs/v1.2 (draft)+ünï.txt"));
    let (base, _) = identity
        .as_str()
        .rsplit_once('_')
        .expect("identity has a hash suffix");

    assert_eq!(base, "v1.2__draft___n_");
}

#[test]
fn new_index_checks_shape() {
    let identity = IndexIdentity::from_path(Path::new("/docs/a.txt"));
    let chunks = vec![chunk("one", 0), chunk("two", 1)];

    let index = VectorIndex::new(
        identity.clone(),
        "embed",
        PathBuf::from("/docs/a.txt"),
        chunks.clone(),
        vec![vec![1.0, 0.0], vec![0.0, 1.0]],
    )
    .expect("consistent index builds");
    assert_eq!(index.len(), 2);
    assert_eq!(index.dimension(), 2);
    assert_eq!(index.embedding_model(), "embed");

    let missing = VectorIndex::new(
        identity.clone(),
        "embed",
        PathBuf::from("/docs/a.txt"),
        chunks.clone(),
        vec![vec![1.0, 0.0]],
    );
    assert!(matches!(missing, Err(RagError::EmbeddingUnavailable(_))));

    let ragged = VectorIndex::new(
        identity,
        "embed",
        PathBuf::from("/docs/a.txt"),
        chunks,
        vec![vec![1.0, 0.0], vec![1.0]],
    );
    assert!(matches!(ragged, Err(RagError::EmbeddingUnavailable(_))));
}

#[test]
fn empty_index_is_valid() {
    let index = VectorIndex::new(
        IndexIdentity::from_path(Path::new("/docs/empty.txt")),
        "embed",
        PathBuf::from("/docs/empty.txt"),
        Vec::new(),
        Vec::new(),
    )
    .expect("degenerate index is allowed");

    assert!(index.is_empty());
    assert_eq!(index.dimension(), 0);
}
