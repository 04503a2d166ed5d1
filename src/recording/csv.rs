use ::csv::{QuoteStyle, Terminator, WriterBuilder};

/// Serialize one data record, newline included. Fields holding a delimiter,
/// a quote, `\r` or `\n` are quoted and embedded quotes doubled.
pub fn encode_row<S: AsRef<str>>(fields: &[S]) -> ::csv::Result<String> {
    encode(fields, QuoteStyle::Necessary)
}

/// Header lines are joined verbatim; column names never need quoting.
pub fn encode_header<S: AsRef<str>>(fields: &[S]) -> ::csv::Result<String> {
    encode(fields, QuoteStyle::Never)
}

fn encode<S: AsRef<str>>(fields: &[S], quote_style: QuoteStyle) -> ::csv::Result<String> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quote_style(quote_style)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(fields.len() * 8));
    writer.write_record(fields.iter().map(|field| field.as_ref()))?;
    let bytes = writer
        .into_inner()
        .map_err(|err| ::csv::Error::from(err.into_error()))?;
    // Every field went in as UTF-8 and the writer only adds ASCII.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
