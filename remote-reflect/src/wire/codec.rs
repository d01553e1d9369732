//! Envelope codec.
//!
//! Request: `<msg><sids/><cntx/><base/><args/></msg>`
//! Response: `<msg><sids/><cntx/>[<rtrn/>]</msg>`
//!
//! `sids` carries the sender's id count, `cntx` the definition of every node
//! tracked by the sender's context. Values inside `base`, `args` and `rtrn`
//! are written as references since `cntx` already defines them.

use roxmltree::{Document, Node as XmlNode};

use super::CodecError;
use super::context::SerializationContext;
use super::node::{Datum, Node};
use super::xml::XmlWriter;

/// A decoded request: the base value (the command code) and its arguments.
#[derive(Debug, Clone)]
pub struct Request {
    pub base: Datum,
    pub args: Vec<Datum>,
}

pub fn encode_request(ctx: &mut SerializationContext, base: &Datum, args: &[Datum]) -> String {
    ctx.register(base);
    for arg in args {
        ctx.register(arg);
    }

    let mut out = XmlWriter::new();
    out.open("msg");
    write_header(ctx, &mut out);
    out.open("base");
    ctx.serialize(base, 0, &mut out);
    out.close("base");
    out.open("args");
    for arg in args {
        ctx.serialize(arg, 0, &mut out);
    }
    out.close("args");
    out.close("msg");
    out.finish()
}

pub fn encode_response(ctx: &mut SerializationContext, rtrn: Option<&Datum>) -> String {
    if let Some(value) = rtrn {
        ctx.register(value);
    }

    let mut out = XmlWriter::new();
    out.open("msg");
    write_header(ctx, &mut out);
    if let Some(value) = rtrn {
        out.open("rtrn");
        ctx.serialize(value, 0, &mut out);
        out.close("rtrn");
    }
    out.close("msg");
    out.finish()
}

fn write_header(ctx: &mut SerializationContext, out: &mut XmlWriter) {
    out.leaf("sids", &ctx.count().to_string());
    out.open("cntx");
    ctx.dump(out);
    out.close("cntx");
}

pub fn decode_request(ctx: &mut SerializationContext, xml: &str) -> Result<Request, CodecError> {
    let doc = Document::parse(xml)?;
    let mut sections = read_header(ctx, &doc)?;

    let base = expect(sections.next(), "base")?;
    let base = decode_value(ctx, first_element(base, "base")?)?;

    let args = expect(sections.next(), "args")?;
    let args = elements(args)
        .map(|el| decode_value(ctx, el))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Request { base, args })
}

pub fn decode_response(
    ctx: &mut SerializationContext,
    xml: &str,
) -> Result<Option<Datum>, CodecError> {
    let doc = Document::parse(xml)?;
    let mut sections = read_header(ctx, &doc)?;

    match sections.next() {
        Some(rtrn) if rtrn.has_tag_name("rtrn") => {
            Ok(Some(decode_value(ctx, first_element(rtrn, "rtrn")?)?))
        }
        Some(other) => Err(CodecError::Unexpected {
            expected: "rtrn",
            found: other.tag_name().name().to_string(),
        }),
        None => Ok(None),
    }
}

/// Apply `sids` and `cntx`; returns the remaining sections.
fn read_header<'a, 'input>(
    ctx: &mut SerializationContext,
    doc: &'a Document<'input>,
) -> Result<impl Iterator<Item = XmlNode<'a, 'input>> + use<'a, 'input>, CodecError> {
    let root = doc.root_element();
    if !root.has_tag_name("msg") {
        return Err(CodecError::Unexpected {
            expected: "msg",
            found: root.tag_name().name().to_string(),
        });
    }

    let mut sections = elements(root);
    let sids = expect(sections.next(), "sids")?;
    let cntx = expect(sections.next(), "cntx")?;
    ctx.expand(sids.text().unwrap_or_default(), elements(cntx).count())?;

    for obj in elements(cntx) {
        define(ctx, obj)?;
    }
    Ok(sections)
}

fn decode_value(ctx: &mut SerializationContext, el: XmlNode<'_, '_>) -> Result<Datum, CodecError> {
    match el.tag_name().name() {
        "num" => {
            let text = el.text().unwrap_or_default();
            text.trim()
                .parse::<f64>()
                .map(Datum::Number)
                .map_err(|_| CodecError::BadNumber(text.to_string()))
        }
        "str" => Ok(Datum::Text(el.text().unwrap_or_default().to_string())),
        _ => define(ctx, el).map(Datum::Node),
    }
}

/// Resolve an `obj` element and, when it carries `fld` records, replace the
/// node's fields with them.
fn define(
    ctx: &mut SerializationContext,
    obj: XmlNode<'_, '_>,
) -> Result<Node, CodecError> {
    let sid = elements(obj)
        .find(|el| el.has_tag_name("sid"))
        .ok_or(CodecError::Missing("sid"))?;
    let text = sid.text().unwrap_or_default();
    let id: u64 = text
        .trim()
        .parse()
        .map_err(|_| CodecError::BadId(text.to_string()))?;
    let node = ctx.resolve(id).ok_or(CodecError::UnknownId(id))?;

    let records: Vec<_> = elements(obj).filter(|el| el.has_tag_name("fld")).collect();
    if !records.is_empty() {
        let mut fields = Vec::with_capacity(records.len());
        for fld in records {
            let idx = elements(fld)
                .find(|el| el.has_tag_name("idx"))
                .ok_or(CodecError::Missing("idx"))?;
            let val = elements(fld)
                .find(|el| el.has_tag_name("val"))
                .ok_or(CodecError::Missing("val"))?;
            let value = decode_value(ctx, first_element(val, "val")?)?;
            fields.push((idx.text().unwrap_or_default().to_string(), value));
        }
        node.replace_fields(fields);
    }
    Ok(node)
}

fn elements<'a, 'input>(
    parent: XmlNode<'a, 'input>,
) -> impl Iterator<Item = XmlNode<'a, 'input>> {
    parent.children().filter(|n| n.is_element())
}

fn first_element<'a, 'input>(
    parent: XmlNode<'a, 'input>,
    name: &'static str,
) -> Result<XmlNode<'a, 'input>, CodecError> {
    elements(parent).next().ok_or(CodecError::Missing(name))
}

fn expect<'a, 'input>(
    el: Option<XmlNode<'a, 'input>>,
    name: &'static str,
) -> Result<XmlNode<'a, 'input>, CodecError> {
    match el {
        Some(el) if el.has_tag_name(name) => Ok(el),
        Some(el) => Err(CodecError::Unexpected {
            expected: name,
            found: el.tag_name().name().to_string(),
        }),
        None => Err(CodecError::Missing(name)),
    }
}
