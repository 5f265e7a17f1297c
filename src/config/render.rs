//! Serializes the registry into `CONFIG.TXT` bytes.

use super::registry::Registry;

use log::warn;

/// Renders one line per occupied slot, in registration order, into `out`:
/// the printer's `name=value` (or `name=default` when the printer is
/// absent, or when the slot's bit is set in `force_defaults`), then the
/// slot's stored comment framing.
///
/// `line` is scratch for assembling each line before the capacity check.
/// A line that would run past `out` is dropped; the remaining entries
/// still get their chance, so a fat value can't starve the short ones
/// behind it.
///
/// Returns the number of bytes produced. `out` is expected to arrive
/// zeroed; this function only writes the bytes it produces.
pub fn render(registry: &Registry, force_defaults: u8, line: &mut [u8], out: &mut [u8]) -> usize {
    let mut pos = 0;

    for (k, entry) in registry.iter() {
        let n = match entry.print {
            Some(print) if force_defaults & (1 << k) == 0 => {
                let n = print(line);
                debug_assert!(n <= line.len());
                n.min(line.len())
            }
            _ => entry.render_default(line),
        };

        let comment = entry.comment();
        let total = n + comment.len();

        if pos + total > out.len() {
            warn!("dropping {:?}: no room left in the file window", entry.name());
            continue;
        }

        out[pos..pos + n].copy_from_slice(&line[..n]);
        out[pos + n..pos + total].copy_from_slice(comment);
        pos += total;
    }

    pos
}

#[cfg(test)]
mod render {
    use super::super::parse::LINE_CAP;
    use super::*;
    use std::assert_eq as eq;

    fn print_fixed(out: &mut [u8]) -> usize {
        let s = b"speed=88";
        out[..s.len()].copy_from_slice(s);
        s.len()
    }

    #[test]
    fn defaults_in_registration_order() {
        let mut r = Registry::new();
        r.register("brightness", "50", "#(0~100)", None, None, None);
        r.register("contrast", "10", "#(0~20)", None, None, None);

        let mut line = [0u8; LINE_CAP];
        let mut out = [0u8; 256];
        let n = render(&r, 0, &mut line, &mut out);

        eq!(
            &out[..n],
            b"brightness=50\t#(0~100)\r\ncontrast=10\t#(0~20)\r\n" as &[u8]
        );
    }

    #[test]
    fn printer_wins_over_default() {
        let mut r = Registry::new();
        r.register("speed", "1", "#knots", None, None, Some(print_fixed));

        let mut line = [0u8; LINE_CAP];
        let mut out = [0u8; 64];
        let n = render(&r, 0, &mut line, &mut out);

        eq!(&out[..n], b"speed=88\t#knots\r\n" as &[u8]);
    }

    #[test]
    fn forced_default_overrides_printer() {
        let mut r = Registry::new();
        r.register("speed", "1", "#knots", None, None, Some(print_fixed));

        let mut line = [0u8; LINE_CAP];
        let mut out = [0u8; 64];
        let n = render(&r, 0b1, &mut line, &mut out);

        eq!(&out[..n], b"speed=1\t#knots\r\n" as &[u8]);
    }

    #[test]
    fn overflowing_line_is_dropped() {
        let mut r = Registry::new();
        r.register("a", "1", "", None, None, None);
        r.register("b", "2", "", None, None, None);

        let mut line = [0u8; LINE_CAP];

        // "a=1\t\r\n" is 6 bytes; leave room for exactly one line.
        let mut out = [0u8; 11];
        let n = render(&r, 0, &mut line, &mut out);
        eq!(&out[..n], b"a=1\t\r\n" as &[u8]);

        // With room for both, both appear.
        let mut out = [0u8; 12];
        let n = render(&r, 0, &mut line, &mut out);
        eq!(&out[..n], b"a=1\t\r\nb=2\t\r\n" as &[u8]);
    }
}
