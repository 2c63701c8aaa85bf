/// Decimals of the staked token and reward amounts.
pub const TOKEN_DECIMALS: u32 = 18;

/// Render a base-unit amount as a decimal string with at least one fractional
/// digit and no trailing zeros, e.g. `1500000000000000000` -> `"1.5"`.
///
/// Exact for every `u128`; no floating point is involved.
pub fn format_token_amount(amount: u128, decimals: u32) -> String {
	if decimals == 0 {
		return format!("{}.0", amount);
	}
	let Some(scale) = 10u128.checked_pow(decimals) else {
		// Every u128 is below one whole token at this precision
		let fraction = format!("{:0width$}", amount, width = decimals as usize);
		return match fraction.trim_end_matches('0') {
			"" => "0.0".to_string(),
			digits => format!("0.{}", digits),
		};
	};

	let whole = amount / scale;
	let fraction = format!("{:0width$}", amount % scale, width = decimals as usize);
	let fraction = fraction.trim_end_matches('0');
	if fraction.is_empty() {
		format!("{}.0", whole)
	} else {
		format!("{}.{}", whole, fraction)
	}
}
