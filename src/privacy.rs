//! Resolvable private addresses
//!
//! A resolvable private address (RPA) is a random address made from a 24 bit random part, the
//! `prand`, and a 24 bit hash of the `prand` using an identity resolving key (IRK). A device that
//! has the IRK can check if the hash matches and thereby resolve the address to its owner.

use rand_core::{CryptoRng, RngCore};

/// A Bluetooth device address
///
/// The address is in the order it is sent over the air, the least significant byte is first.
pub type BluetoothDeviceAddress = [u8; 6];

/// The random address hash function *ah*
///
/// The `prand` is the least significant byte first.
pub fn ah(irk: u128, prand: [u8; 3]) -> [u8; 3] {
    let padded = <u128>::from(prand[0]) | <u128>::from(prand[1]) << 8 | <u128>::from(prand[2]) << 16;

    let cypher_text = e(irk, padded);

    [cypher_text as u8, (cypher_text >> 8) as u8, (cypher_text >> 16) as u8]
}

/// AES-128 encryption of a single block
fn e(key: u128, plain_text: u128) -> u128 {
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockEncrypt, KeyInit};

    let cipher = aes::Aes128::new(GenericArray::from_slice(&key.to_be_bytes()));

    let mut block = plain_text.to_be_bytes();

    cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));

    <u128>::from_be_bytes(block)
}

/// A resolvable private address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rpa(BluetoothDeviceAddress);

impl Rpa {
    /// Generate a new resolvable private address
    pub fn generate<R>(irk: u128, rng: &mut R) -> Self
    where
        R: RngCore + CryptoRng,
    {
        let mut prand = [0u8; 3];

        loop {
            rng.fill_bytes(&mut prand);

            // the two most significant bits are 0b01
            prand[2] = (prand[2] & 0x3F) | 0x40;

            // the random part cannot be all zeros or all ones
            let random_part = [prand[0], prand[1], prand[2] & 0x3F];

            if random_part != [0, 0, 0] && random_part != [0xFF, 0xFF, 0x3F] {
                break;
            }
        }

        let hash = ah(irk, prand);

        Rpa([hash[0], hash[1], hash[2], prand[0], prand[1], prand[2]])
    }

    /// Check if `address` is a resolvable private address
    pub fn is_rpa(address: &BluetoothDeviceAddress) -> bool {
        address[5] & 0xC0 == 0x40
    }

    /// Resolve `address` with `irk`
    ///
    /// True is returned if `address` is a resolvable private address that was created with
    /// `irk`.
    pub fn resolves(address: &BluetoothDeviceAddress, irk: u128) -> bool {
        Self::is_rpa(address) && ah(irk, [address[3], address[4], address[5]]) == [address[0], address[1], address[2]]
    }

    pub fn get_address(&self) -> BluetoothDeviceAddress {
        self.0
    }
}
