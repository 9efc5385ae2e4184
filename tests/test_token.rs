#[cfg(test)]
mod token_tests {
    use dovepub::parser::token::{has_token_len, inline_tokens, is_token, opened_hash, opened_timestamp};

    const A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
    const B: &str = "b+/9zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz=";

    #[test]
    fn test_token_shape() {
        assert!(is_token(A));
        assert!(is_token(B));
        assert!(!is_token(&A[..43]));
        assert!(!is_token(&A.replace('=', "A")));
        assert!(!is_token("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA-="));
        assert!(has_token_len(&"x".repeat(44)));
        assert!(!has_token_len(&"x".repeat(45)));
    }

    #[test]
    fn test_inline_tokens_in_text() {
        let text = format!("see {} and ({}) for details", A, B);
        assert_eq!(inline_tokens(&text), vec![A, B]);
        assert_eq!(inline_tokens(A), vec![A]);
    }

    #[test]
    fn test_inline_tokens_need_clean_boundaries() {
        // 44 alphabet characters before the pad is too long
        let long = format!("x{}", A);
        assert!(inline_tokens(&long).is_empty());
        // trailing alphabet character after the pad
        let glued = format!("{}q", A);
        assert!(inline_tokens(&glued).is_empty());
        // double pad is fine: the second `=` is not an alphabet character
        let padded = format!("{}=", A);
        assert_eq!(inline_tokens(&padded), vec![A]);
        assert!(inline_tokens("no tokens here").is_empty());
    }

    #[test]
    fn test_opened_form() {
        let opened = format!("1700000000123{}", A);
        assert_eq!(opened_hash(&opened), Some(A));
        assert_eq!(opened_timestamp(&opened), Some(1_700_000_000_123));
        assert_eq!(opened_hash("1700000000123short"), None);
        assert_eq!(opened_timestamp("17000000001x3"), None);
    }
}
