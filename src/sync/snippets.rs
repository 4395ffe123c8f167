//! Remote-side helpers pushed once per connection before the first sync.

use crate::sync::HashStrategy;

const SYNC: &str = include_str!("snippets/sync.py");
const HF_PLAIN: &str = include_str!("snippets/hf.py");
const HF_NATIVE: &str = include_str!("snippets/hf_native.py");
const HF_VIPER: &str = include_str!("snippets/hf_viper.py");

/// Definition of `__replink_hf(path, buf)` for `strategy`.
pub fn hash_snippet(strategy: HashStrategy) -> &'static str {
    match strategy {
        HashStrategy::Plain => HF_PLAIN,
        HashStrategy::Native => HF_NATIVE,
        HashStrategy::Viper => HF_VIPER,
    }
}

/// Hash function plus the inventory, mkdir and delete helpers.
pub fn sync_snippet(strategy: HashStrategy) -> String {
    let mut code = String::with_capacity(HF_VIPER.len() + SYNC.len() + 1);
    code.push_str(hash_snippet(strategy));
    if !code.ends_with('\n') {
        code.push('\n');
    }
    code.push_str(SYNC);
    code
}

/// Push key; switching strategy mid-connection redefines the hash function.
pub fn snippet_key(strategy: HashStrategy) -> String {
    format!("sync:{}", strategy)
}
