use uuid::Uuid;

const FLICKR_BASE58: &[u8; 58] = b"123456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

/// New record id: a random UUID rendered in the Flickr base58 alphabet.
pub fn create() -> String {
    encode(Uuid::new_v4().as_u128())
}

fn encode(mut value: u128) -> String {
    if value == 0 {
        return (FLICKR_BASE58[0] as char).to_string();
    }

    let mut digits = Vec::with_capacity(22);
    while value > 0 {
        digits.push(FLICKR_BASE58[(value % 58) as usize]);
        value /= 58;
    }
    digits.iter().rev().map(|&d| d as char).collect()
}
