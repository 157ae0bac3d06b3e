// ERC-20 calls used while probing
//
// Only the `balanceOf` view and the `transfer` mutation are needed.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};

sol! {
    #[derive(Debug)]
    function balanceOf(address owner) external view returns (uint256);

    #[derive(Debug)]
    function transfer(address to, uint256 amount) external returns (bool);
}

pub fn encode_balance_of(owner: Address) -> Bytes {
    balanceOfCall { owner }.abi_encode().into()
}

pub fn encode_transfer(to: Address, amount: U256) -> Bytes {
    transferCall { to, amount }.abi_encode().into()
}

/// First return word as an unsigned integer. Short return data decodes as zero.
pub fn decode_uint(data: &[u8]) -> U256 {
    match data.get(..32) {
        Some(word) => U256::from_be_slice(word),
        None => U256::ZERO,
    }
}

/// A `transfer()` only counts as successful when it returned `true`.
pub fn decode_success(data: &[u8]) -> bool {
    decode_uint(data) == U256::from(1u64)
}
