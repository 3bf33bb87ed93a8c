//! Container assembly: zip + package-document (OPF) + NCX, grounded on the
//! teacher's `updater/native/epub.rs` writer shape (`xml::writer::XmlEvent`
//! sequences flushed through a small `write_elements` helper, `zip::ZipWriter`
//! for the archive). Images are embedded as base64 data URIs directly in
//! their referencing document, so unlike the teacher the manifest carries
//! no separate image entries.

use std::io::Write;

use eyre::{Context, Result};
use xml::writer::XmlEvent;
use xml::EmitterConfig;
use xml::EventWriter;

use super::record::{BookPlan, NavNode};

fn write_elements(writer: &mut EventWriter<&mut (impl Write + Sized)>, elements: Vec<XmlEvent>) -> Result<()> {
    for element in elements {
        writer.write(element).wrap_err("writing XML event")?;
    }
    Ok(())
}

pub fn write_epub(plan: &BookPlan, path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).wrap_err("creating output directory")?;
    }
    let file = std::fs::File::create(path).wrap_err("creating container file")?;
    let mut zip = zip::ZipWriter::new(file);
    fn opts() -> zip::write::FileOptions<'static, ()> {
        zip::write::FileOptions::default()
    }

    zip.start_file("mimetype", opts()).wrap_err("starting mimetype entry")?;
    zip.write_all(b"application/epub+zip")?;

    zip.add_directory("META-INF", opts())?;
    zip.start_file("META-INF/container.xml", opts())?;
    write_container_xml(&mut zip)?;

    zip.start_file("OEBPS/content.opf", opts())?;
    write_content_opf(plan, &mut zip)?;

    zip.start_file("OEBPS/toc.ncx", opts())?;
    write_toc_ncx(plan, &mut zip)?;

    zip.start_file("OEBPS/styles/stylesheet.css", opts())?;
    zip.write_all(include_bytes!("../assets/stylesheet.css"))?;

    for document in &plan.documents {
        zip.start_file(format!("OEBPS/{}", document.href), opts())?;
        write_document(document, &mut zip)?;
    }

    zip.finish().wrap_err("finalizing container")?;
    Ok(())
}

fn write_container_xml(file: &mut impl Write) -> Result<()> {
    let mut xml = EmitterConfig::new().perform_indent(true).create_writer(file);
    write_elements(
        &mut xml,
        vec![
            XmlEvent::start_element("container")
                .attr("version", "1.0")
                .ns("", "urn:oasis:names:tc:opendocument:xmlns:container")
                .into(),
            XmlEvent::start_element("rootfiles").into(),
            XmlEvent::start_element("rootfile")
                .attr("full-path", "OEBPS/content.opf")
                .attr("media-type", "application/oebps-package+xml")
                .into(),
            XmlEvent::end_element().into(),
            XmlEvent::end_element().into(),
            XmlEvent::end_element().into(),
        ],
    )
}

#[allow(clippy::too_many_lines)]
fn write_content_opf(plan: &BookPlan, file: &mut impl Write) -> Result<()> {
    let mut xml = EmitterConfig::new().perform_indent(true).create_writer(file);
    write_elements(
        &mut xml,
        vec![
            XmlEvent::start_element("package")
                .ns("", "http://www.idpf.org/2007/opf")
                .attr("version", "2.0")
                .attr("unique-identifier", "bookid")
                .into(),
            XmlEvent::start_element("metadata")
                .ns("dc", "http://purl.org/dc/elements/1.1/")
                .into(),
            XmlEvent::start_element("dc:title").into(),
            XmlEvent::characters(&plan.title),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("dc:creator").into(),
            XmlEvent::characters(&plan.author),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("dc:description").into(),
            XmlEvent::characters(&plan.summary),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("dc:language").into(),
            XmlEvent::characters("vi"),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("dc:identifier")
                .attr("id", "bookid")
                .into(),
            XmlEvent::characters(&uuid::Uuid::new_v4().to_string()),
            XmlEvent::end_element().into(),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("manifest").into(),
            XmlEvent::start_element("item")
                .attr("id", "ncx")
                .attr("href", "toc.ncx")
                .attr("media-type", "application/x-dtbncx+xml")
                .into(),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("item")
                .attr("id", "stylesheet")
                .attr("href", "styles/stylesheet.css")
                .attr("media-type", "text/css")
                .into(),
            XmlEvent::end_element().into(),
        ],
    )?;

    for document in &plan.documents {
        write_elements(
            &mut xml,
            vec![
                XmlEvent::start_element("item")
                    .attr("id", &document.id)
                    .attr("href", &document.href)
                    .attr("media-type", "application/xhtml+xml")
                    .into(),
                XmlEvent::end_element().into(),
            ],
        )?;
    }

    write_elements(
        &mut xml,
        vec![
            XmlEvent::end_element().into(),
            XmlEvent::start_element("spine").attr("toc", "ncx").into(),
        ],
    )?;
    for document in &plan.documents {
        write_elements(
            &mut xml,
            vec![
                XmlEvent::start_element("itemref").attr("idref", &document.id).into(),
                XmlEvent::end_element().into(),
            ],
        )?;
    }
    write_elements(
        &mut xml,
        vec![XmlEvent::end_element().into(), XmlEvent::end_element().into()],
    )
}

fn write_toc_ncx(plan: &BookPlan, file: &mut impl Write) -> Result<()> {
    let mut xml = EmitterConfig::new().perform_indent(true).create_writer(file);
    write_elements(
        &mut xml,
        vec![
            XmlEvent::start_element("ncx")
                .ns("", "http://www.daisy.org/z3986/2005/ncx/")
                .attr("version", "2005-1")
                .into(),
            XmlEvent::start_element("head").into(),
            XmlEvent::start_element("meta")
                .attr("name", "dtb:uid")
                .attr("content", &plan.title)
                .into(),
            XmlEvent::end_element().into(),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("docTitle").into(),
            XmlEvent::start_element("text").into(),
            XmlEvent::characters(&plan.title),
            XmlEvent::end_element().into(),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("navMap").into(),
        ],
    )?;

    let mut play_order = 0u32;
    for node in &plan.nav {
        write_nav_point(node, &mut play_order, &mut xml)?;
    }

    write_elements(
        &mut xml,
        vec![XmlEvent::end_element().into(), XmlEvent::end_element().into()],
    )
}

fn write_nav_point(
    node: &NavNode,
    play_order: &mut u32,
    xml: &mut EventWriter<&mut (impl Write + Sized)>,
) -> Result<()> {
    *play_order += 1;
    let id = format!("navpoint-{play_order}");
    write_elements(
        xml,
        vec![
            XmlEvent::start_element("navPoint")
                .attr("id", &id)
                .attr("playOrder", &play_order.to_string())
                .into(),
            XmlEvent::start_element("navLabel").into(),
            XmlEvent::start_element("text").into(),
            XmlEvent::characters(&node.title),
            XmlEvent::end_element().into(),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("content").attr("src", &node.href).into(),
            XmlEvent::end_element().into(),
        ],
    )?;
    for child in &node.children {
        write_nav_point(child, play_order, xml)?;
    }
    write_elements(xml, vec![XmlEvent::end_element().into()])
}

fn write_document(document: &super::record::Document, file: &mut impl Write) -> Result<()> {
    let mut config = EmitterConfig::new().perform_indent(true);
    config.perform_escaping = false;
    let mut xml = config.create_writer(file);
    write_elements(
        &mut xml,
        vec![
            XmlEvent::characters("\n<!DOCTYPE html>\n"),
            XmlEvent::start_element("html")
                .ns("", "http://www.w3.org/1999/xhtml")
                .ns("epub", "http://www.idpf.org/2007/ops")
                .attr("xml:lang", "vi")
                .into(),
            XmlEvent::start_element("head").into(),
            XmlEvent::start_element("title").into(),
            XmlEvent::characters(&document.title),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("link")
                .attr("rel", "stylesheet")
                .attr("type", "text/css")
                .attr("href", "styles/stylesheet.css")
                .into(),
            XmlEvent::end_element().into(),
            XmlEvent::end_element().into(),
            XmlEvent::start_element("body").into(),
            XmlEvent::characters(&document.body_html),
            XmlEvent::end_element().into(),
            XmlEvent::end_element().into(),
        ],
    )
}
