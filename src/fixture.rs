//! Payload pushed through every proxy chain
//!
//! Multi-line text with blank lines, tabs, and quotes, so truncation,
//! reordering, and line-ending damage all show up in a line diff.

/// Bytes sent into the entry side and expected unchanged at the exit side
pub const TEST_FILE: &[u8] = b"\
THIS IS A TEST FILE. IT'S USED BY THE INTEGRATION TESTS.
THIS IS A TEST FILE. IT'S USED BY THE INTEGRATION TESTS.
THIS IS A TEST FILE. IT'S USED BY THE INTEGRATION TESTS.
THIS IS A TEST FILE. IT'S USED BY THE INTEGRATION TESTS.

\"Can entropy ever be reversed?\"
\"THERE IS AS YET INSUFFICIENT DATA FOR A MEANINGFUL ANSWER.\"
\"Can entropy ever be reversed?\"
\"THERE IS AS YET INSUFFICIENT DATA FOR A MEANINGFUL ANSWER.\"
\"Can entropy ever be reversed?\"
\"THERE IS AS YET INSUFFICIENT DATA FOR A MEANINGFUL ANSWER.\"
\"Can entropy ever be reversed?\"
\"THERE IS AS YET INSUFFICIENT DATA FOR A MEANINGFUL ANSWER.\"
\"Can entropy ever be reversed?\"
\"THERE IS AS YET INSUFFICIENT DATA FOR A MEANINGFUL ANSWER.\"
\"Can entropy ever be reversed?\"
\"THERE IS AS YET INSUFFICIENT DATA FOR A MEANINGFUL ANSWER.\"
\"Can entropy ever be reversed?\"
\"THERE IS AS YET INSUFFICIENT DATA FOR A MEANINGFUL ANSWER.\"
\"Can entropy ever be reversed?\"
\"THERE IS AS YET INSUFFICIENT DATA FOR A MEANINGFUL ANSWER.\"

    In obfuscatory age geeky warfare did I wage
      For hiding bits from nasty censors' sight
    I was hacker to my set in that dim dark age of net
      And I hacked from noon till three or four at night

    Then a rival from Helsinki said my protocol was dinky
      So I flamed him with a condescending laugh,
    Saying his designs for stego might as well be made of lego
      And that my bikeshed was prettier by half.

    But Claude Shannon saw my shame. From his noiseless channel came
       A message sent with not a wasted byte
    \"There are nine and sixty ways to disguise communiques
       And RATHER MORE THAN ONE OF THEM IS RIGHT\"

		    (apologies to Rudyard Kipling.)
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_shape() {
        assert!(TEST_FILE.starts_with(b"THIS IS A TEST FILE."));
        assert!(TEST_FILE.ends_with(b"(apologies to Rudyard Kipling.)\n"));
        assert!(TEST_FILE.contains(&b'\t'));
        assert!(TEST_FILE.contains(&b'"'));
    }
}
